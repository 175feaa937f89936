//! NodePool — the ordered set of known nodes.
//!
//! All mutations rewrite the pool snapshot. Snapshot write failures are
//! logged and do not undo the in-memory change; the in-memory pool is
//! authoritative while the process runs.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tracing::{debug, info, warn};

use relaygrid_state::{NodeRecord, SnapshotStore, StateResult};

use crate::client::NodeClient;
use crate::node::{Node, NodeHandle};

/// Outcome of a `refresh_all` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub refreshed: u32,
    pub failed: u32,
}

/// Thread-safe, persisted list of nodes.
#[derive(Clone)]
pub struct NodePool {
    nodes: Arc<RwLock<Vec<NodeHandle>>>,
    store: SnapshotStore,
}

impl NodePool {
    /// Load the pool from `store`. A missing snapshot yields an empty pool.
    pub fn open(store: SnapshotStore) -> StateResult<Self> {
        let records: Vec<NodeRecord> = store.load()?.unwrap_or_default();
        let nodes: Vec<NodeHandle> = records
            .into_iter()
            .map(|r| Arc::new(Node::from_record(r)))
            .collect();
        info!(count = nodes.len(), "node pool loaded");

        Ok(Self {
            nodes: Arc::new(RwLock::new(nodes)),
            store,
        })
    }

    /// Create an empty, non-persistent pool (for testing).
    pub fn in_memory() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Vec::new())),
            store: SnapshotStore::in_memory(),
        }
    }

    /// Add a static node. Returns `None` if the address is incomplete or
    /// already present.
    pub fn add(&self, host: &str, port: u16, token: Option<String>) -> Option<NodeHandle> {
        if host.trim().is_empty() || port == 0 {
            warn!(%host, port, "refusing to add node without host and port");
            return None;
        }
        self.insert(Node::new(host.trim(), port, token))
    }

    /// Add a node built elsewhere (e.g. by the autoscaler). Same duplicate
    /// rule as [`add`](Self::add).
    pub fn insert(&self, node: Node) -> Option<NodeHandle> {
        let handle = {
            let mut nodes = self.nodes.write().expect("node pool lock");
            if nodes
                .iter()
                .any(|n| n.host() == node.host() && n.port() == node.port())
            {
                warn!(node = %node, "node already in pool");
                return None;
            }
            let handle = Arc::new(node);
            nodes.push(handle.clone());
            handle
        };

        info!(node = %handle, autospawned = handle.is_autospawned(), "node added");
        self.persist();
        Some(handle)
    }

    /// Remove a node by identity. Returns whether it was present.
    pub fn remove(&self, node: &NodeHandle) -> bool {
        let removed = {
            let mut nodes = self.nodes.write().expect("node pool lock");
            let before = nodes.len();
            nodes.retain(|n| !Arc::ptr_eq(n, node));
            nodes.len() != before
        };

        if removed {
            info!(node = %node, "node removed");
            self.persist();
        }
        removed
    }

    /// Snapshot of all nodes in insertion order.
    pub fn list(&self) -> Vec<NodeHandle> {
        self.nodes.read().expect("node pool lock").clone()
    }

    /// Node at a 0-based position in [`list`](Self::list) order.
    pub fn get(&self, index: usize) -> Option<NodeHandle> {
        self.nodes.read().expect("node pool lock").get(index).cloned()
    }

    /// Find a node by address.
    pub fn find(&self, host: &str, port: u16) -> Option<NodeHandle> {
        self.nodes
            .read()
            .expect("node pool lock")
            .iter()
            .find(|n| n.host() == host && n.port() == port)
            .cloned()
    }

    /// Whether this exact node (by identity) is in the pool.
    pub fn contains(&self, node: &NodeHandle) -> bool {
        self.nodes
            .read()
            .expect("node pool lock")
            .iter()
            .any(|n| Arc::ptr_eq(n, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("node pool lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nodes created by the autoscaler.
    pub fn autospawned_count(&self) -> usize {
        self.nodes
            .read()
            .expect("node pool lock")
            .iter()
            .filter(|n| n.is_autospawned())
            .count()
    }

    /// Lock or unlock a node for automatic selection.
    pub fn set_locked(&self, node: &NodeHandle, locked: bool) -> bool {
        if !self.contains(node) {
            return false;
        }
        node.set_locked(locked);
        info!(node = %node, locked, "node lock changed");
        self.persist();
        true
    }

    /// First online node with a status snapshot, used to answer pool-wide
    /// informational queries.
    pub fn reference_node(&self) -> Option<NodeHandle> {
        self.nodes
            .read()
            .expect("node pool lock")
            .iter()
            .find(|n| n.is_online() && n.info().is_some())
            .cloned()
    }

    /// Refresh every node concurrently. Failures are logged per node and
    /// never change membership.
    pub async fn refresh_all(&self, client: &NodeClient) -> RefreshStats {
        let nodes = self.list();
        let results = join_all(nodes.iter().map(|node| async move {
            let result = node.refresh(client).await;
            (node, result)
        }))
        .await;

        let mut stats = RefreshStats::default();
        for (node, result) in results {
            match result {
                Ok(()) => stats.refreshed += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(node = %node, error = %e, "node refresh failed");
                }
            }
        }

        debug!(refreshed = stats.refreshed, failed = stats.failed, "pool refreshed");
        if !nodes.is_empty() {
            self.persist();
        }
        stats
    }

    /// Write the current pool to the snapshot store. The pool is captured
    /// under the store's save lock, so concurrent persists land in order.
    pub fn persist(&self) {
        let result = self.store.save_with(|| {
            self.list()
                .iter()
                .map(|n| n.to_record())
                .collect::<Vec<NodeRecord>>()
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to persist node pool");
        }
    }
}
