use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite,
};

use super::{AppendOutcome, VotingStore};
use crate::error::{Result, VotingError};
use crate::models::{VoteLogEntry, VoteRank, VotingConfig};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_url` and ensures the schema.
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating voting database at {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. One connection, or each would see its own copy.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voting_configs (
                show_slug TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                active_group TEXT,
                timer_ends_at TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                show_slug TEXT NOT NULL,
                group_name TEXT NOT NULL,
                performer_id INTEGER NOT NULL,
                performer_name TEXT NOT NULL,
                vote_rank INTEGER NOT NULL CHECK (vote_rank BETWEEN 1 AND 3),
                ip_hash TEXT NOT NULL,
                token TEXT NOT NULL,
                voted_at TEXT NOT NULL,
                UNIQUE (show_slug, group_name, ip_hash, vote_rank)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS vote_log_show_group ON vote_log (show_slug, group_name)")
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn config_exists(&self, show_slug: &str) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM voting_configs WHERE show_slug = ?")
            .bind(show_slug)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(exists)
    }
}

// Fixed width so text comparison in SQL orders the same as time.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VotingError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

#[async_trait]
impl VotingStore for Database {
    async fn insert_voting_config(&self, config: &VotingConfig) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO voting_configs (show_slug, config, version, active_group, timer_ends_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.show_slug)
        .bind(serde_json::to_string(config)?)
        .bind(config.version)
        .bind(&config.active_group)
        .bind(config.timer_ends_at().map(encode_time))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(VotingError::InvalidState(format!(
                "show '{}' is already scheduled for voting",
                config.show_slug
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_voting_config(&self, show_slug: &str) -> Result<VotingConfig> {
        let row = sqlx::query("SELECT config, version FROM voting_configs WHERE show_slug = ?")
            .bind(show_slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VotingError::ShowNotFound(show_slug.to_string()))?;

        let mut config: VotingConfig = serde_json::from_str(&row.get::<String, _>("config"))?;
        config.version = row.get::<i64, _>("version");
        Ok(config)
    }

    async fn save_voting_config(&self, config: &VotingConfig, expected_version: i64) -> Result<i64> {
        let new_version = expected_version + 1;
        let mut stored = config.clone();
        stored.version = new_version;

        let updated = sqlx::query(
            r#"
            UPDATE voting_configs
            SET config = ?, version = ?, active_group = ?, timer_ends_at = ?
            WHERE show_slug = ? AND version = ?
            "#,
        )
        .bind(serde_json::to_string(&stored)?)
        .bind(new_version)
        .bind(&stored.active_group)
        .bind(stored.timer_ends_at().map(encode_time))
        .bind(&stored.show_slug)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            if !self.config_exists(&config.show_slug).await? {
                return Err(VotingError::ShowNotFound(config.show_slug.clone()));
            }
            warn!(
                "Version conflict saving voting config for {} (expected v{})",
                config.show_slug, expected_version
            );
            return Err(VotingError::PersistenceConflict(config.show_slug.clone()));
        }

        Ok(new_version)
    }

    async fn append_vote_log_rows(&self, rows: &[VoteLogEntry]) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO vote_log (show_slug, group_name, performer_id, performer_name, vote_rank, ip_hash, token, voted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.show_slug)
            .bind(&row.group_name)
            .bind(row.performer_id)
            .bind(&row.performer_name)
            .bind(row.vote_rank.as_i64())
            .bind(&row.ip_hash)
            .bind(&row.token)
            .bind(encode_time(row.voted_at))
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await?;
                    return Ok(AppendOutcome::ConstraintViolation);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(AppendOutcome::Appended)
    }

    async fn query_vote_log(&self, show_slug: &str, group: Option<&str>) -> Result<Vec<VoteLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT show_slug, group_name, performer_id, performer_name, vote_rank, ip_hash, token, voted_at
            FROM vote_log
            WHERE show_slug = ? AND (? IS NULL OR group_name = ?)
            ORDER BY id
            "#,
        )
        .bind(show_slug)
        .bind(group)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_rank = row.get::<i64, _>("vote_rank");
                let vote_rank = VoteRank::from_i64(raw_rank)
                    .ok_or_else(|| VotingError::Corrupt(format!("vote rank {} out of range", raw_rank)))?;
                Ok(VoteLogEntry {
                    show_slug: row.get("show_slug"),
                    group_name: row.get("group_name"),
                    performer_id: row.get("performer_id"),
                    performer_name: row.get("performer_name"),
                    vote_rank,
                    ip_hash: row.get("ip_hash"),
                    token: row.get("token"),
                    voted_at: decode_time(&row.get::<String, _>("voted_at"))?,
                })
            })
            .collect()
    }

    async fn expired_groups(&self, now: DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let expired = sqlx::query(
            r#"
            SELECT show_slug, active_group
            FROM voting_configs
            WHERE active_group IS NOT NULL AND timer_ends_at IS NOT NULL AND timer_ends_at <= ?
            ORDER BY show_slug
            "#,
        )
        .bind(encode_time(now))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| (row.get::<String, _>("show_slug"), row.get::<String, _>("active_group")))
        .collect();
        Ok(expired)
    }
}
