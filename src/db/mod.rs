mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::Database;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{VoteLogEntry, VotingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A `(show, group, voter, rank)` slot was already taken. Nothing was written.
    ConstraintViolation,
}

/// Persistence port for voting state and the vote log.
#[async_trait]
pub trait VotingStore: Send + Sync {
    /// Fails with `InvalidState` if the show already has a config.
    async fn insert_voting_config(&self, config: &VotingConfig) -> Result<()>;

    /// The returned config carries the stored version.
    async fn load_voting_config(&self, show_slug: &str) -> Result<VotingConfig>;

    /// Compare-and-swap on `expected_version`. Returns the new version, or
    /// `PersistenceConflict` if the stored version moved on.
    async fn save_voting_config(&self, config: &VotingConfig, expected_version: i64) -> Result<i64>;

    /// All rows or none.
    async fn append_vote_log_rows(&self, rows: &[VoteLogEntry]) -> Result<AppendOutcome>;

    /// Rows in insertion order, optionally restricted to one group.
    async fn query_vote_log(&self, show_slug: &str, group: Option<&str>) -> Result<Vec<VoteLogEntry>>;

    /// `(show_slug, active_group)` for every show whose timer has run out.
    async fn expired_groups(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>>;
}
