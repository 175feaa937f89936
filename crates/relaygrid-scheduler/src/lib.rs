//! relaygrid-scheduler — picks nodes for jobs and tracks where jobs went.
//!
//! [`NodeSelector`] ranks the pool by live load and, when nothing is
//! eligible, asks a [`NodeSpawner`] (the autoscaler) for exactly one new
//! node. [`Dispatcher`] is the single entry point the HTTP layer uses: it
//! bundles selection, route/task bookkeeping, rate limiting, and the
//! commit hook.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── NodeSelector (NodePool + Option<Arc<dyn NodeSpawner>>)
//!   ├── RouteTable / TaskTable
//!   ├── ConcurrencyMonitor / FloodMonitor
//!   └── Option<AutoscaleController> (commit teardown, autospawned removal)
//! ```

pub mod dispatcher;
pub mod selector;

pub use dispatcher::{Dispatcher, JobLocation};
pub use selector::{NodeSelector, NodeSpawner, rank};
