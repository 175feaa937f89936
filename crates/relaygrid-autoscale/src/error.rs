//! Autoscaler errors.

use thiserror::Error;

use relaygrid_machine::MachineError;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing required provider setting: {0}")]
    MissingKey(String),

    #[error("invalid provider config: {0}")]
    Config(String),

    #[error("object storage check failed: {0}")]
    Storage(String),

    #[error("no machine size can handle a job of {job_size} images")]
    CannotHandle { job_size: u32 },

    #[error("machine limit reached")]
    LimitReached,

    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("node on {machine} ({address}) never came online")]
    NeverOnline { machine: String, address: String },

    #[error("node {address} is already in the pool")]
    Duplicate { address: String },

    #[error("all {attempts} attempts to create a node failed, last error: {last}")]
    Exhausted { attempts: u32, last: String },
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
