use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::VotingStore;
use crate::error::{Result, VotingError};
use crate::models::{validate_timer_duration, RoundState, VotingConfig, Weights};

/// Moves a show through its voting groups. Every transition is a
/// load / check / compare-and-swap save, so of two racing transitions from
/// the same state only one can land.
pub struct RoundController {
    store: Arc<dyn VotingStore>,
    clock: Arc<dyn Clock>,
}

impl RoundController {
    pub fn new(store: Arc<dyn VotingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn round_state(&self, show_slug: &str) -> Result<RoundState> {
        Ok(self.store.load_voting_config(show_slug).await?.round_state())
    }

    pub async fn start_group(&self, show_slug: &str, group: &str) -> Result<VotingConfig> {
        let mut config = self.store.load_voting_config(show_slug).await?;
        let expected = config.version;
        open_group(&mut config, group, self.clock.now())?;
        let config = self.persist(config, expected).await?;
        info!(
            "Opened voting for {} / {} ({}s window)",
            show_slug, group, config.timer_duration
        );
        Ok(config)
    }

    pub async fn close_active_group(&self, show_slug: &str) -> Result<VotingConfig> {
        let mut config = self.store.load_voting_config(show_slug).await?;
        let expected = config.version;
        let group = close_group(&mut config)?;
        let config = self.persist(config, expected).await?;
        info!("Closed voting for {} / {}", show_slug, group);
        Ok(config)
    }

    /// Whether the active group's advisory timer has run out. False when
    /// nothing is active.
    pub async fn is_expired(&self, show_slug: &str) -> Result<bool> {
        let config = self.store.load_voting_config(show_slug).await?;
        Ok(config.is_expired(self.clock.now()))
    }

    /// Closes the active group only if its timer has run out. Returns the
    /// group closed, or `None` if there was nothing to do, including when
    /// another request transitioned the show first.
    pub async fn close_if_expired(&self, show_slug: &str) -> Result<Option<String>> {
        let mut config = self.store.load_voting_config(show_slug).await?;
        if !config.is_expired(self.clock.now()) {
            return Ok(None);
        }
        let expected = config.version;
        let group = close_group(&mut config)?;
        match self.persist(config, expected).await {
            Ok(_) => {
                info!("Timer expired, closed voting for {} / {}", show_slug, group);
                Ok(Some(group))
            }
            Err(VotingError::PersistenceConflict(_)) => {
                info!("{} changed while closing expired group {}, leaving it", show_slug, group);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn reveal_results(&self, show_slug: &str) -> Result<VotingConfig> {
        let mut config = self.store.load_voting_config(show_slug).await?;
        let expected = config.version;
        reveal(&mut config)?;
        let config = self.persist(config, expected).await?;
        info!("Results revealed for {}", show_slug);
        Ok(config)
    }

    /// Live weight edit. Scores are recomputed from the log, so this
    /// reweights every vote already cast for the show.
    pub async fn update_weights(&self, show_slug: &str, weights: Weights) -> Result<VotingConfig> {
        weights.validate()?;
        let mut config = self.store.load_voting_config(show_slug).await?;
        let expected = config.version;
        config.weights = weights;
        let config = self.persist(config, expected).await?;
        info!(
            "Weights for {} set to {}/{}/{}",
            show_slug, weights.first, weights.second, weights.third
        );
        Ok(config)
    }

    pub async fn update_timer_duration(&self, show_slug: &str, seconds: i64) -> Result<VotingConfig> {
        validate_timer_duration(seconds)?;
        let mut config = self.store.load_voting_config(show_slug).await?;
        let expected = config.version;
        config.timer_duration = seconds;
        self.persist(config, expected).await
    }

    async fn persist(&self, mut config: VotingConfig, expected_version: i64) -> Result<VotingConfig> {
        config.check_invariants()?;
        match self.store.save_voting_config(&config, expected_version).await {
            Ok(version) => {
                config.version = version;
                Ok(config)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Stale voting config for {} at v{}", config.show_slug, expected_version);
                }
                Err(e)
            }
        }
    }
}

fn open_group(config: &mut VotingConfig, group: &str, now: DateTime<Utc>) -> Result<()> {
    if let Some(active) = &config.active_group {
        return Err(VotingError::InvalidState(format!(
            "group '{}' is still open for show '{}'",
            active, config.show_slug
        )));
    }
    if !config.groups.contains_key(group) {
        return Err(VotingError::InvalidState(format!(
            "show '{}' has no group named '{}'",
            config.show_slug, group
        )));
    }
    config.active_group = Some(group.to_string());
    config.timer_start = Some(now);
    Ok(())
}

fn close_group(config: &mut VotingConfig) -> Result<String> {
    let group = config
        .active_group
        .take()
        .ok_or_else(|| VotingError::NoActiveGroup(config.show_slug.clone()))?;
    config.timer_start = None;
    config.closed_groups.retain(|closed| closed != &group);
    config.closed_groups.push(group.clone());
    Ok(group)
}

fn reveal(config: &mut VotingConfig) -> Result<()> {
    if let Some(active) = &config.active_group {
        return Err(VotingError::PrematureReveal(active.clone()));
    }
    config.reveal_results = true;
    Ok(())
}
