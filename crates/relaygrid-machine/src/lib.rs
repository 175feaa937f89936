//! relaygrid-machine — cloud VM lifecycle through an external CLI.
//!
//! Wraps a `docker-machine` compatible command-line tool. Every invocation
//! runs as a child process registered under the machine name it targets, so
//! a teardown can wait for in-flight provisioning commands on the same
//! machine before it runs.
//!
//! # Architecture
//!
//! ```text
//! MachineDriver (trait)
//!   └── DockerMachine
//!       ├── create / inspect / ssh / ip / destroy
//!       └── ProcessRegistry (machine name → live process count)
//! ```

pub mod driver;
pub mod error;
pub mod inspect;
pub mod process;

pub use driver::{DockerMachine, MachineDriver};
pub use error::{MachineError, MachineResult};
pub use inspect::MachineInspect;
pub use process::{ProcessGuard, ProcessRegistry};
