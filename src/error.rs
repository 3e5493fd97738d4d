//! Error types for the bridge indexer

use thiserror::Error;

/// Main error type for the indexer
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Node error for chain {chain_id}: {message}")]
    Node { chain_id: u64, message: String },

    #[error("Invalid height {height} reported by chain {chain_id}")]
    InvalidHeight { chain_id: u64, height: u64 },

    #[error("Event decoding error for chain {chain_id}: {message}")]
    Decode { chain_id: u64, message: String },

    #[error("No adapter registered for chain {chain_id}")]
    UnknownChain { chain_id: u64 },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Listener stopped")]
    Stopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    /// Check if error is recovered by retrying on a later tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::Node { .. }
                | IndexerError::InvalidHeight { .. }
                | IndexerError::Decode { .. }
                | IndexerError::Database(_)
        )
    }

    /// Check if error must terminate the listener task
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexerError::UnknownChain { .. }
                | IndexerError::StorageUnavailable(_)
                | IndexerError::Config(_)
        )
    }

    pub fn node(chain_id: u64, message: impl ToString) -> Self {
        IndexerError::Node {
            chain_id,
            message: message.to_string(),
        }
    }
}

/// Result type for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_are_retryable_not_fatal() {
        let err = IndexerError::node(2, "timeout");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Node error for chain 2: timeout");
    }

    #[test]
    fn storage_unavailable_is_fatal() {
        let err = IndexerError::StorageUnavailable("pool closed".into());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }
}
