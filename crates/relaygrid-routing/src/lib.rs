//! relaygrid-routing — where does a job live?
//!
//! Two tables answer that question over a job's lifetime:
//!
//! ```text
//! job id ──► RouteTable  (node alive: job → NodeHandle + caller token)
//!        └─► TaskTable   (node gone: job → archived status + output)
//! ```
//!
//! The route table is in-memory only and has no expiry; entries are removed
//! when a job is forgotten or its node is torn down. The task table is
//! persisted and evicts records that have not been read for
//! [`TASK_RETENTION_SECS`].

pub mod handoff;
pub mod route_table;
pub mod task_table;

pub use handoff::{STATUS_FAILED, archive_routes};
pub use route_table::{Route, RouteTable};
pub use task_table::{TASK_RETENTION_SECS, TaskTable};
