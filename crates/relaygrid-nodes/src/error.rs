//! Node communication errors.

use thiserror::Error;

/// Errors from talking to a processing node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {address} failed: {reason}")]
    Request { address: String, reason: String },

    #[error("{address} answered with status {status}: {body}")]
    Status {
        address: String,
        status: u16,
        body: String,
    },

    #[error("{address} reported an error: {message}")]
    Remote { address: String, message: String },

    #[error("invalid response from {address}: {reason}")]
    Decode { address: String, reason: String },

    #[error("request to {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },
}

pub type NodeResult<T> = Result<T, NodeError>;
