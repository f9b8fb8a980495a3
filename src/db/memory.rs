use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{AppendOutcome, VotingStore};
use crate::error::{Result, VotingError};
use crate::models::{VoteLogEntry, VoteRank, VotingConfig};

type SlotKey = (String, String, String, VoteRank);

#[derive(Default)]
struct Tables {
    configs: HashMap<String, VotingConfig>,
    log: Vec<VoteLogEntry>,
    slots: HashSet<SlotKey>,
}

/// Process-local store with the same guarantees as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn slot_key(row: &VoteLogEntry) -> SlotKey {
    (
        row.show_slug.clone(),
        row.group_name.clone(),
        row.ip_hash.clone(),
        row.vote_rank,
    )
}

#[async_trait]
impl VotingStore for MemoryStore {
    async fn insert_voting_config(&self, config: &VotingConfig) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.configs.contains_key(&config.show_slug) {
            return Err(VotingError::InvalidState(format!(
                "show '{}' is already scheduled for voting",
                config.show_slug
            )));
        }
        tables.configs.insert(config.show_slug.clone(), config.clone());
        Ok(())
    }

    async fn load_voting_config(&self, show_slug: &str) -> Result<VotingConfig> {
        self.tables
            .read()
            .await
            .configs
            .get(show_slug)
            .cloned()
            .ok_or_else(|| VotingError::ShowNotFound(show_slug.to_string()))
    }

    async fn save_voting_config(&self, config: &VotingConfig, expected_version: i64) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .configs
            .get_mut(&config.show_slug)
            .ok_or_else(|| VotingError::ShowNotFound(config.show_slug.clone()))?;
        if stored.version != expected_version {
            return Err(VotingError::PersistenceConflict(config.show_slug.clone()));
        }
        *stored = config.clone();
        stored.version = expected_version + 1;
        Ok(stored.version)
    }

    async fn append_vote_log_rows(&self, rows: &[VoteLogEntry]) -> Result<AppendOutcome> {
        let mut tables = self.tables.write().await;
        let mut batch = HashSet::new();
        for row in rows {
            let key = slot_key(row);
            if tables.slots.contains(&key) || !batch.insert(key) {
                return Ok(AppendOutcome::ConstraintViolation);
            }
        }
        tables.slots.extend(batch);
        tables.log.extend_from_slice(rows);
        Ok(AppendOutcome::Appended)
    }

    async fn query_vote_log(&self, show_slug: &str, group: Option<&str>) -> Result<Vec<VoteLogEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .log
            .iter()
            .filter(|row| row.show_slug == show_slug)
            .filter(|row| group.is_none_or(|g| row.group_name == g))
            .cloned()
            .collect())
    }

    async fn expired_groups(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<(String, String)> = tables
            .configs
            .values()
            .filter(|config| config.is_expired(now))
            .filter_map(|config| {
                config
                    .active_group
                    .clone()
                    .map(|group| (config.show_slug.clone(), group))
            })
            .collect();
        expired.sort();
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Performer, VotingSetup, Weights};
    use chrono::{Duration, TimeZone};

    fn row(voter: &str, performer: i64, rank: VoteRank) -> VoteLogEntry {
        VoteLogEntry {
            show_slug: "jazz-night".to_string(),
            group_name: "Group 1".to_string(),
            performer_id: performer,
            performer_name: format!("Act {}", performer),
            vote_rank: rank,
            ip_hash: voter.to_string(),
            token: "tok".to_string(),
            voted_at: Utc.with_ymd_and_hms(2026, 7, 4, 20, 1, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn rejected_batch_writes_nothing() {
        let store = MemoryStore::new();
        store
            .append_vote_log_rows(&[row("voter-a", 1, VoteRank::First)])
            .await
            .unwrap();

        let outcome = store
            .append_vote_log_rows(&[row("voter-a", 2, VoteRank::Second), row("voter-a", 3, VoteRank::First)])
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::ConstraintViolation);
        assert_eq!(store.query_vote_log("jazz-night", None).await.unwrap().len(), 1);

        // Rank 2 was never committed, so it is still free.
        let retry = store
            .append_vote_log_rows(&[row("voter-a", 2, VoteRank::Second)])
            .await
            .unwrap();
        assert_eq!(retry, AppendOutcome::Appended);
    }

    #[tokio::test]
    async fn repeated_slot_within_one_batch_is_a_violation() {
        let store = MemoryStore::new();
        let outcome = store
            .append_vote_log_rows(&[row("voter-a", 1, VoteRank::First), row("voter-a", 2, VoteRank::First)])
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::ConstraintViolation);
        assert!(store.query_vote_log("jazz-night", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_groups_reads_each_config_timer() {
        let store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2026, 7, 4, 20, 0, 0).unwrap();
        let mut config = VotingConfig::from_setup(VotingSetup {
            show_slug: "jazz-night".to_string(),
            roster: vec![Performer { id: 1, name: "Ana".to_string() }],
            num_groups: 1,
            top_per_group: 1,
            timer_duration: 45,
            weights: Weights::default(),
            hide_bios: false,
        })
        .unwrap();
        store.insert_voting_config(&config).await.unwrap();
        assert!(store.expired_groups(start).await.unwrap().is_empty());

        config.active_group = Some("Group 1".to_string());
        config.timer_start = Some(start);
        assert_eq!(store.save_voting_config(&config, 0).await.unwrap(), 1);
        assert!(matches!(
            store.save_voting_config(&config, 0).await,
            Err(VotingError::PersistenceConflict(_))
        ));

        assert!(store.expired_groups(start + Duration::seconds(44)).await.unwrap().is_empty());
        assert_eq!(
            store.expired_groups(start + Duration::seconds(45)).await.unwrap(),
            vec![("jazz-night".to_string(), "Group 1".to_string())]
        );
    }
}
