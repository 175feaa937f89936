//! relaygrid-nodes — the pool of processing nodes.
//!
//! Tracks every known node (static and autospawned), refreshes their status
//! snapshots over HTTP, and persists the pool so it survives restarts.
//!
//! # Liveness
//!
//! A node is online iff its last *successful* status refresh happened less
//! than five minutes ago. Nothing stores an "online" flag; failed refreshes
//! simply stop advancing the timestamp.
//!
//! # Architecture
//!
//! ```text
//! NodePool (Arc<RwLock<Vec<NodeHandle>>> + SnapshotStore)
//!   ├── add / insert / remove / list / get / set_locked
//!   ├── refresh_all(NodeClient) → concurrent /info fetch per node
//!   └── reference_node()
//! PoolRefresher
//!   └── periodic refresh_all until shutdown
//! ```

pub mod client;
pub mod error;
pub mod node;
pub mod pool;
pub mod refresh;

pub use client::NodeClient;
pub use error::{NodeError, NodeResult};
pub use node::{Node, NodeHandle, ONLINE_WINDOW_SECS};
pub use pool::{NodePool, RefreshStats};
pub use refresh::PoolRefresher;
