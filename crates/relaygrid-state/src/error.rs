//! Error types for relaygrid snapshot persistence.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while loading or saving snapshots.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read snapshot: {0}")]
    Read(String),

    #[error("failed to write snapshot: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
