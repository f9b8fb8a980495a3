use std::env;
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::error::{Result, VotingError};
use crate::identity::{IdentityStrategy, NetworkFingerprint, SessionFingerprint, DEFAULT_SESSION_TTL_SECONDS};

const DEFAULT_DATABASE_URL: &str = "sqlite:festival_vote.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_EXPIRY_CHECK_SECONDS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Remote address only.
    Network,
    /// Remote address plus the widget session token, when it verifies.
    Session,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub voter_hash_secret: String,
    pub identity_mode: IdentityMode,
    pub expiry_check_interval_seconds: u64,
    pub session_ttl_seconds: i64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let voter_hash_secret = lookup("VOTER_HASH_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| VotingError::InvalidInput("VOTER_HASH_SECRET must be set".to_string()))?;

        let identity_mode = match lookup("IDENTITY_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("session") => IdentityMode::Session,
            Some("network") => IdentityMode::Network,
            Some(other) => {
                return Err(VotingError::InvalidInput(format!(
                    "IDENTITY_MODE must be 'network' or 'session', got '{}'",
                    other
                )));
            }
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            voter_hash_secret,
            identity_mode,
            expiry_check_interval_seconds: parse_or(
                &lookup,
                "EXPIRY_CHECK_INTERVAL_SECONDS",
                DEFAULT_EXPIRY_CHECK_SECONDS,
            )?,
            session_ttl_seconds: parse_or(&lookup, "SESSION_TOKEN_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS)?,
        })
    }

    pub fn identity_strategy(&self) -> Result<Arc<dyn IdentityStrategy>> {
        let identity: Arc<dyn IdentityStrategy> = match self.identity_mode {
            IdentityMode::Network => Arc::new(NetworkFingerprint::new(self.voter_hash_secret.clone())),
            IdentityMode::Session => Arc::new(SessionFingerprint::new(
                self.voter_hash_secret.clone(),
                self.session_ttl_seconds,
                Arc::new(SystemClock),
            )?),
        };
        Ok(identity)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| VotingError::InvalidInput(format!("{} has an invalid value '{}'", key, raw))),
    }
}
