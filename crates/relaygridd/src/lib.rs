//! relaygridd — the relaygrid orchestrator daemon.
//!
//! Assembles the node pool, route and task tables, rate limiters, and the
//! optional autoscaler behind the HTTP API:
//!
//! ```text
//!   relaygridd.toml ──► DaemonConfig
//!                          │
//!        ┌─────────────────┼──────────────────┐
//!        ▼                 ▼                  ▼
//!    NodePool         TaskTable        AutoscaleController
//!   (nodes.json)     (tasks.json)     (provider JSON, docker-machine)
//!        └────────► Dispatcher ◄──────────────┘
//!                       │
//!                   axum Router
//! ```

pub mod config;
pub mod daemon;

pub use config::DaemonConfig;
pub use daemon::Daemon;
