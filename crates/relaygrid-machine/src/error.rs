//! Machine driver error types.

use thiserror::Error;

/// Errors raised while running machine lifecycle commands.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("failed to spawn {command} for machine {machine}: {source}")]
    Spawn {
        machine: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed for machine {machine} (exit code {code:?}): {output}")]
    CommandFailed {
        machine: String,
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("cannot parse inspect output for machine {machine}: {reason}")]
    Inspect { machine: String, reason: String },
}

pub type MachineResult<T> = Result<T, MachineError>;
