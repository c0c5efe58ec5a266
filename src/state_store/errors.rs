//! Key-value transport errors
//!
//! These never leave the [`StateStore`](super::StateStore) boundary: the store
//! logs them and reports a failure indicator instead.

use thiserror::Error;

/// Errors that can occur while talking to the key-value backend
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// Failed to reach the backend
    #[error("Key-value connection error: {0}")]
    Connection(String),

    /// Failed to serialize or deserialize a stored value
    #[error("Key-value serialization error: {0}")]
    Serialization(String),

    /// Backend rejected or failed the command
    #[error("Key-value backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for key-value operations
pub type KvResult<T> = Result<T, KvError>;
