use thiserror::Error;

pub type Result<T> = std::result::Result<T, VotingError>;

#[derive(Debug, Error)]
pub enum VotingError {
    /// A round transition was requested from a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No group is currently active for show '{0}'")]
    NoActiveGroup(String),

    #[error("Cannot reveal results while group '{0}' is still active")]
    PrematureReveal(String),

    /// The stored config changed between load and save. Reload and retry.
    #[error("Voting config for show '{0}' was modified concurrently")]
    PersistenceConflict(String),

    #[error("Show not found: {0}")]
    ShowNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Stored voting data is unreadable: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for VotingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl VotingError {
    /// Only optimistic-concurrency conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceConflict(_))
    }

    /// Errors caused by the caller's request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(_)
                | Self::NoActiveGroup(_)
                | Self::PrematureReveal(_)
                | Self::ShowNotFound(_)
                | Self::InvalidInput(_)
        )
    }
}
