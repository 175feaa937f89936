//! Best-node selection.
//!
//! A node is eligible when it is online, unlocked, has a status snapshot,
//! has a free processing slot, and its advertised image limit admits the
//! job. A saturated pool falls through to the spawner. Among eligible nodes the
//! one with the lowest queue-to-parallelism ratio wins; ties go to the
//! node that joined the pool first. Tier sizing is the autoscaler's
//! concern and plays no part in ranking.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use relaygrid_autoscale::AutoscaleController;
use relaygrid_nodes::{NodeHandle, NodePool};
use relaygrid_state::epoch_secs;

/// Something that can add a node to the pool on demand.
#[async_trait]
pub trait NodeSpawner: Send + Sync {
    fn is_allowed_to_create_new_node(&self) -> bool;

    fn can_handle(&self, job_size: u32) -> bool;

    /// Create a node sized for `job_size`. `None` on failure.
    async fn create_node(&self, job_size: u32) -> Option<NodeHandle>;
}

#[async_trait]
impl NodeSpawner for AutoscaleController {
    fn is_allowed_to_create_new_node(&self) -> bool {
        AutoscaleController::is_allowed_to_create_new_node(self)
    }

    fn can_handle(&self, job_size: u32) -> bool {
        self.provider().can_handle(job_size)
    }

    async fn create_node(&self, job_size: u32) -> Option<NodeHandle> {
        match AutoscaleController::create_node(self, job_size).await {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(job_size, error = %e, "autoscaler could not provide a node");
                None
            }
        }
    }
}

/// Least-loaded eligible node in `nodes` at time `now`.
pub fn rank(nodes: &[NodeHandle], job_size: u32, now: u64) -> Option<NodeHandle> {
    let mut best: Option<(&NodeHandle, f64)> = None;
    for node in nodes {
        if !node.is_online_at(now) || node.is_locked() {
            continue;
        }
        let Some(info) = node.info() else {
            continue;
        };
        if !info.has_free_slot() || !info.accepts(job_size) {
            continue;
        }
        let ratio = info.load_ratio();
        // Strictly less keeps the earlier node on ties.
        if best.is_none_or(|(_, r)| ratio < r) {
            best = Some((node, ratio));
        }
    }
    best.map(|(node, _)| node.clone())
}

/// Chooses a node for each new job.
#[derive(Clone)]
pub struct NodeSelector {
    pool: NodePool,
    spawner: Option<Arc<dyn NodeSpawner>>,
}

impl NodeSelector {
    pub fn new(pool: NodePool) -> Self {
        Self {
            pool,
            spawner: None,
        }
    }

    /// Fall back to `spawner` when no node is eligible.
    pub fn with_spawner(mut self, spawner: Arc<dyn NodeSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Best node for a job of `job_size` images, spawning one if needed.
    pub async fn select_node(&self, job_size: u32) -> Option<NodeHandle> {
        if let Some(node) = rank(&self.pool.list(), job_size, epoch_secs()) {
            debug!(node = %node, job_size, "node selected");
            return Some(node);
        }

        let spawner = self.spawner.as_ref()?;
        if !spawner.is_allowed_to_create_new_node() {
            info!(job_size, "no eligible node and machine limit reached");
            return None;
        }
        if !spawner.can_handle(job_size) {
            info!(job_size, "no eligible node and no machine size fits the job");
            return None;
        }

        info!(job_size, "no eligible node, creating one");
        spawner.create_node(job_size).await
    }
}
