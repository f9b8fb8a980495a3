use log::{info, warn};
use std::future::Future;

use crate::engine::VotingEngine;
use crate::error::Result;
use crate::models::{validate_show_slug, VotingConfig, VotingSetup, Weights};
use crate::voting::Scoreboard;

/// Runs a transition, and on a version conflict reloads and runs it once
/// more. A second conflict is handed back to the caller as transient.
async fn with_conflict_retry<T, F, Fut>(show_slug: &str, action: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            warn!("{} on {} hit a version conflict, retrying once", action, show_slug);
            op().await
        }
        other => other,
    }
}

/// Puts a show up for audience voting.
pub async fn schedule_show(engine: &VotingEngine, setup: VotingSetup) -> Result<VotingConfig> {
    let config = VotingConfig::from_setup(setup)?;
    engine.store.insert_voting_config(&config).await?;
    info!(
        "Scheduled voting for {}: {} performers in {} groups",
        config.show_slug,
        config.pool.len(),
        config.groups.len()
    );
    Ok(config)
}

pub async fn start_group(engine: &VotingEngine, show_slug: &str, group: &str) -> Result<VotingConfig> {
    validate_show_slug(show_slug)?;
    with_conflict_retry(show_slug, "start_group", move || engine.rounds.start_group(show_slug, group)).await
}

pub async fn close_active_group(engine: &VotingEngine, show_slug: &str) -> Result<VotingConfig> {
    validate_show_slug(show_slug)?;
    with_conflict_retry(show_slug, "close_active_group", move || {
        engine.rounds.close_active_group(show_slug)
    })
    .await
}

pub async fn reveal_results(engine: &VotingEngine, show_slug: &str) -> Result<VotingConfig> {
    validate_show_slug(show_slug)?;
    with_conflict_retry(show_slug, "reveal_results", move || engine.rounds.reveal_results(show_slug)).await
}

pub async fn update_weights(engine: &VotingEngine, show_slug: &str, weights: Weights) -> Result<VotingConfig> {
    validate_show_slug(show_slug)?;
    with_conflict_retry(show_slug, "update_weights", move || {
        engine.rounds.update_weights(show_slug, weights)
    })
    .await
}

pub async fn update_timer_duration(engine: &VotingEngine, show_slug: &str, seconds: i64) -> Result<VotingConfig> {
    validate_show_slug(show_slug)?;
    with_conflict_retry(show_slug, "update_timer_duration", move || {
        engine.rounds.update_timer_duration(show_slug, seconds)
    })
    .await
}

/// Live per-group scores regardless of the reveal flag.
pub async fn live_scores(engine: &VotingEngine, show_slug: &str) -> Result<Scoreboard> {
    validate_show_slug(show_slug)?;
    engine.scoring.score_show(show_slug).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing;
    use crate::error::VotingError;
    use crate::models::{Performer, RoundState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> VotingSetup {
        VotingSetup {
            show_slug: "jazz-night".to_string(),
            roster: (1..=6)
                .map(|id| Performer {
                    id,
                    name: format!("Act {}", id),
                })
                .collect(),
            num_groups: 3,
            top_per_group: 1,
            timer_duration: 45,
            weights: Weights::default(),
            hide_bios: true,
        }
    }

    #[tokio::test]
    async fn schedule_then_run_the_show() {
        let (engine, _clock) = testing::engine();
        let config = schedule_show(&engine, setup()).await.unwrap();
        assert_eq!(config.groups.len(), 3);

        let err = schedule_show(&engine, setup()).await.unwrap_err();
        assert!(matches!(err, VotingError::InvalidState(_)));

        for group in ["Group 1", "Group 2", "Group 3"] {
            start_group(&engine, "jazz-night", group).await.unwrap();
            close_active_group(&engine, "jazz-night").await.unwrap();
        }
        assert_eq!(
            engine.rounds.round_state("jazz-night").await.unwrap(),
            RoundState::AllGroupsClosed
        );
        assert!(reveal_results(&engine, "jazz-night").await.unwrap().reveal_results);
    }

    #[tokio::test]
    async fn unbounded_timer_is_refused_before_it_can_run() {
        let (engine, _clock) = testing::engine();
        let mut endless = setup();
        endless.timer_duration = 10_000_000_000_000;
        let err = schedule_show(&engine, endless).await.unwrap_err();
        assert!(matches!(err, VotingError::InvalidInput(_)));

        schedule_show(&engine, setup()).await.unwrap();
        assert!(update_timer_duration(&engine, "jazz-night", i64::MAX).await.is_err());
        start_group(&engine, "jazz-night", "Group 1").await.unwrap();
        assert_eq!(
            engine.rounds.round_state("jazz-night").await.unwrap(),
            RoundState::GroupActive("Group 1".to_string())
        );
    }

    #[tokio::test]
    async fn bad_slug_never_reaches_the_store() {
        let (engine, _clock) = testing::engine();
        let err = start_group(&engine, "Jazz Night", "Group 1").await.unwrap_err();
        assert!(matches!(err, VotingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_show_is_reported() {
        let (engine, _clock) = testing::engine();
        let err = close_active_group(&engine, "no-such-show").await.unwrap_err();
        assert!(matches!(err, VotingError::ShowNotFound(_)));
    }

    #[tokio::test]
    async fn conflict_is_retried_exactly_once() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32> = with_conflict_retry("jazz-night", "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(VotingError::PersistenceConflict("jazz-night".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32> = with_conflict_retry("jazz-night", "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VotingError::PersistenceConflict("jazz-night".to_string()))
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: Result<u32> = with_conflict_retry("jazz-night", "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(VotingError::NoActiveGroup("jazz-night".to_string()))
        })
        .await;
        assert!(matches!(result, Err(VotingError::NoActiveGroup(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_scores_ignore_reveal_flag_and_weights_edit_live() {
        let (engine, _clock) = testing::engine();
        schedule_show(&engine, setup()).await.unwrap();
        update_weights(&engine, "jazz-night", Weights { first: 4.0, second: 0.0, third: 0.0 })
            .await
            .unwrap();
        assert_eq!(update_timer_duration(&engine, "jazz-night", 30).await.unwrap().timer_duration, 30);

        let scores = live_scores(&engine, "jazz-night").await.unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|(_, results)| results.iter().all(|r| r.total_votes == 0)));
    }
}
