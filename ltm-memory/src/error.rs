//! Error types for ltm-memory

use thiserror::Error;

/// Result type alias for ltm-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ltm-memory
#[derive(Error, Debug)]
pub enum Error {
    /// The durable medium cannot be reached or is corrupted
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The merge step failed; stored memory was not touched
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Completion(err.to_string())
    }
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn reconciliation(msg: impl Into<String>) -> Self {
        Self::ReconciliationFailed(msg.into())
    }

    pub fn completion(msg: impl Into<String>) -> Self {
        Self::Completion(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the error came from the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Whether the error came from the merge step or the completion service behind it
    pub fn is_reconciliation(&self) -> bool {
        matches!(self, Self::ReconciliationFailed(_) | Self::Completion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_errors_map_to_storage_unavailable() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_storage());
        assert!(err.to_string().starts_with("Storage unavailable"));
    }

    #[test]
    fn completion_errors_count_as_reconciliation() {
        assert!(Error::completion("timeout").is_reconciliation());
        assert!(Error::reconciliation("empty output").is_reconciliation());
        assert!(!Error::invalid_input("blank").is_reconciliation());
    }
}
