/*
    errors.rs - Error types for versioned repositories
*/

use thiserror::Error;

/// Errors that can occur in a versioned repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Commit attempted on a slave
    #[error("Repository is not a master; commits are not permitted")]
    NotMaster,

    /// Replicated put attempted on a master
    #[error("Repository is not a slave; replicated versions are not accepted")]
    NotSlave,

    /// Optimistic concurrency check failed; check out the latest version and retry
    #[error("Commit based on version {actual}, but the latest version is {expected}")]
    Conflict { expected: u64, actual: u64 },

    /// Versions start at 1
    #[error("Invalid version: {0}")]
    InvalidVersion(u64),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// Whether the caller can recover by checking out again and retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Storage(err.to_string())
    }
}
