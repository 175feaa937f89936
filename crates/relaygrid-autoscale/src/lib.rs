//! relaygrid-autoscale — grows and shrinks the pool with cloud machines.
//!
//! When no node can take a job, the scheduler asks the
//! [`AutoscaleController`] for a new one. The controller picks a machine
//! size from the configured [`Provider`], creates and provisions the
//! machine through a [`MachineDriver`](relaygrid_machine::MachineDriver),
//! waits for the node to answer, and adds it to the pool. Autospawned
//! nodes are torn down after their job commits, or reaped by the vacuum
//! once they outlive their runtime or upload limits.
//!
//! # Architecture
//!
//! ```text
//! provider::from_config(json) ─► Arc<dyn Provider>
//!   ├── DigitalOcean / Hetzner / Aws  (driver flags per size tier)
//!   └── validate(&dyn StorageProbe)   (S3Probe: signed PUT + DELETE)
//!
//! AutoscaleController
//!   ├── create_node / destroy_node / is_allowed_to_create_new_node
//!   ├── on_commit → archive → teardown (deferred, cancellable)
//!   └── run(shutdown) → vacuum every 10 min
//! ```

pub mod controller;
pub mod error;
pub mod provider;
pub mod storage;

pub use controller::{AutoscaleController, ControllerConfig, VACUUM_INTERVAL};
pub use error::{AutoscaleError, AutoscaleResult};
pub use provider::{Provider, SetupContext};
pub use storage::{S3Probe, StorageProbe};
