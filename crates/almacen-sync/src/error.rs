//! # Sync Error Types

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering reconciliation failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for retry decisions
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// The remote source rejected or failed an operation.
    #[error("Remote error: {message}")]
    Remote { message: String, retryable: bool },

    /// Local store failure while draining or marking the queue.
    #[error("Store error: {0}")]
    Store(#[from] almacen_store::StoreError),

    /// Payload (de)serialization failure.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// A retryable remote failure (network-ish).
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent remote rejection.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        SyncError::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { retryable, .. } => *retryable,
            SyncError::Store(_) => true,
            SyncError::InvalidConfig(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::Serialization(_) => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categorization() {
        assert!(SyncError::remote_retryable("connection reset").is_retryable());
        assert!(!SyncError::remote_fatal("unknown collection").is_retryable());
        assert!(!SyncError::InvalidConfig("batch_size = 0".into()).is_retryable());
    }
}
