use log::{error, info};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::interval;

use crate::engine::VotingEngine;
use crate::error::Result;

/// Closes every active group whose timer has run out, one spawned task per
/// show. Returns the `(show_slug, group)` pairs this sweep actually closed.
pub async fn sweep_expired_groups(engine: &Arc<VotingEngine>) -> Result<Vec<(String, String)>> {
    let now = engine.clock.now();
    let expired = engine.store.expired_groups(now).await?;
    if expired.is_empty() {
        return Ok(Vec::new());
    }
    info!("Found {} expired voting group(s) at {}", expired.len(), now.to_rfc3339());

    let handles: Vec<_> = expired
        .into_iter()
        .map(|(show_slug, group)| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                match engine.rounds.close_if_expired(&show_slug).await {
                    Ok(Some(closed_group)) => Some((show_slug, closed_group)),
                    // An operator got there first.
                    Ok(None) => None,
                    Err(e) => {
                        error!("Error closing expired group {} for {}: {}", group, show_slug, e);
                        None
                    }
                }
            })
        })
        .collect();

    let mut closed = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Some(pair)) => closed.push(pair),
            Ok(None) => {}
            Err(e) => error!("Expiry close task failed: {}", e),
        }
    }
    Ok(closed)
}

pub async fn close_expired_groups_task(engine: Arc<VotingEngine>, interval_secs: u64) {
    info!("Starting background task to close expired voting groups...");
    let mut interval = interval(StdDuration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;
        if let Err(e) = sweep_expired_groups(&engine).await {
            error!("Failed to query for expired voting groups: {}", e);
        }
    }
}
