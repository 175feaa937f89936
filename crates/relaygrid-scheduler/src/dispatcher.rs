//! Dispatcher — the calls the HTTP layer makes around a job's life.
//!
//! ```text
//! admit_if_not_rate_limited(token)
//!   └─► select_node(size) ─► (proxy, out of crate) ─► record_route(job, node, token)
//! lookup_route(job)  ─► Routed(node) | Archived(record)
//! on_commit(job)     ─► release limiter slots ─► autoscaler.on_commit
//! ```
//!
//! A commit is acted on once per route; repeats are ignored.

use std::sync::Arc;

use tracing::{debug, info, warn};

use relaygrid_autoscale::AutoscaleController;
use relaygrid_limits::{ConcurrencyMonitor, FloodMonitor};
use relaygrid_nodes::{NodeClient, NodeHandle, NodePool};
use relaygrid_routing::{Route, RouteTable, TaskTable, archive_routes};
use relaygrid_state::TaskRecord;

use crate::selector::NodeSelector;

/// Where a job can be answered from.
#[derive(Debug, Clone)]
pub enum JobLocation {
    /// The job's node is alive; forward to it.
    Routed(Route),
    /// The node is gone; answer from the archive.
    Archived(TaskRecord),
}

/// Facade over selection, job bookkeeping, and admission control.
#[derive(Clone)]
pub struct Dispatcher {
    pool: NodePool,
    routes: RouteTable,
    tasks: TaskTable,
    selector: NodeSelector,
    autoscaler: Option<AutoscaleController>,
    concurrency: ConcurrencyMonitor,
    flood: FloodMonitor,
    client: NodeClient,
}

impl Dispatcher {
    /// A dispatcher without autoscaling or rate limits.
    pub fn new(pool: NodePool, routes: RouteTable, tasks: TaskTable) -> Self {
        Self {
            selector: NodeSelector::new(pool.clone()),
            pool,
            routes,
            tasks,
            autoscaler: None,
            concurrency: ConcurrencyMonitor::new(None),
            flood: FloodMonitor::new(0),
            client: NodeClient::new(),
        }
    }

    /// Spawn nodes through `autoscaler` and let it handle commits.
    pub fn with_autoscaler(mut self, autoscaler: AutoscaleController) -> Self {
        self.selector = NodeSelector::new(self.pool.clone()).with_spawner(Arc::new(autoscaler.clone()));
        self.autoscaler = Some(autoscaler);
        self
    }

    pub fn with_limits(mut self, concurrency: ConcurrencyMonitor, flood: FloodMonitor) -> Self {
        self.concurrency = concurrency;
        self.flood = flood;
        self
    }

    pub fn with_client(mut self, client: NodeClient) -> Self {
        self.client = client;
        self
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn autoscaler(&self) -> Option<&AutoscaleController> {
        self.autoscaler.as_ref()
    }

    pub fn flood(&self) -> &FloodMonitor {
        &self.flood
    }

    // ── Job lifecycle ─────────────────────────────────────────────

    pub async fn select_node(&self, job_size: u32) -> Option<NodeHandle> {
        self.selector.select_node(job_size).await
    }

    /// Bind a job to the node that accepted it. Refused (returns `false`)
    /// when the node is no longer in the pool.
    pub fn record_route(&self, job_id: &str, node: NodeHandle, token: Option<String>) -> bool {
        if !self.pool.contains(&node) {
            warn!(job_id, node = %node, "not routing job to a node outside the pool");
            return false;
        }
        self.routes.add(job_id, node.clone(), token);
        // Teardown removes the node from the pool before purging its routes,
        // so a node gone by now may have been purged before our insert.
        if !self.pool.contains(&node) {
            self.routes.remove_by_node(&node);
            warn!(job_id, node = %node, "node left the pool while routing job");
            return false;
        }
        true
    }

    /// Live route first, archive second.
    pub fn lookup_route(&self, job_id: &str) -> Option<JobLocation> {
        if let Some(route) = self.routes.lookup(job_id) {
            return Some(JobLocation::Routed(route));
        }
        self.tasks.lookup(job_id).map(JobLocation::Archived)
    }

    /// Stop routing a job. Returns whether a route existed.
    pub fn forget_route(&self, job_id: &str) -> bool {
        self.routes.remove(job_id).is_some()
    }

    /// Keep a job's status answerable independent of its node.
    pub fn archive_task(
        &self,
        job_id: &str,
        task_info: serde_json::Value,
        output: Option<Vec<String>>,
        token: Option<String>,
    ) {
        self.tasks.add(job_id, task_info, output, token);
    }

    /// A node reported that a job finished.
    pub async fn on_commit(&self, job_id: &str) {
        let Some(route) = self.routes.mark_committed(job_id) else {
            debug!(job_id, "commit for unknown or already committed job");
            return;
        };
        if let Some(token) = route.token.as_deref() {
            self.flood.decrement(token);
            self.concurrency.decrease(token);
        }
        if let Some(autoscaler) = &self.autoscaler {
            autoscaler.on_commit(job_id).await;
        }
    }

    /// Admission check for a caller about to start a job. Admitted jobs
    /// count toward the caller's flood counter.
    pub fn admit_if_not_rate_limited(&self, token: &str) -> bool {
        if self.flood.is_flooding(token) {
            return false;
        }
        if !self.concurrency.admit(token) {
            info!(token, "caller rate limited");
            return false;
        }
        self.flood.increment(token);
        true
    }

    // ── Pool administration ───────────────────────────────────────

    /// Remove a node from service. Autospawned nodes are destroyed through
    /// the autoscaler; others are archived, unrouted, and dropped.
    pub async fn remove_node(&self, node: &NodeHandle) -> bool {
        if node.is_autospawned() {
            if let Some(autoscaler) = &self.autoscaler {
                return autoscaler.destroy_node(node).await;
            }
            warn!(node = %node, "removing autospawned node without an autoscaler; its machine keeps running");
        }

        // Out of the pool first: nothing new can be routed to it while its
        // jobs are archived.
        if !self.pool.remove(node) {
            return false;
        }
        archive_routes(&self.routes, &self.tasks, &self.client, node).await;
        self.routes.remove_by_node(node);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::Json;
    use axum::routing::get;
    use relaygrid_state::{NodeInfo, epoch_secs};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(NodePool::in_memory(), RouteTable::new(), TaskTable::in_memory())
            .with_client(NodeClient::new().with_timeout(Duration::from_millis(300)))
    }

    async fn spawn_node() -> u16 {
        let app = axum::Router::new().route(
            "/task/{id}/info",
            get(|| async { Json(json!({"status": {"code": 20}})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn selected_node_is_recorded_and_looked_up() {
        let d = dispatcher();
        let node = d.pool().add("10.0.0.1", 3000, None).unwrap();
        node.record_refresh(
            NodeInfo {
                max_parallel_tasks: 1,
                ..Default::default()
            },
            epoch_secs(),
        );

        let chosen = d.select_node(5).await.unwrap();
        assert!(d.record_route("job-1", chosen, Some("caller".to_string())));

        match d.lookup_route("job-1") {
            Some(JobLocation::Routed(route)) => {
                assert!(Arc::ptr_eq(&route.node, &node));
                assert_eq!(route.token.as_deref(), Some("caller"));
            }
            other => panic!("expected a live route, got {other:?}"),
        }
    }

    #[test]
    fn archive_answers_when_no_route() {
        let d = dispatcher();
        assert!(d.lookup_route("job").is_none());

        d.archive_task("job", json!({"status": {"code": 40}}), None, None);
        assert!(matches!(d.lookup_route("job"), Some(JobLocation::Archived(_))));
    }

    #[test]
    fn forget_route_reports_presence() {
        let d = dispatcher();
        let node = d.pool().add("10.0.0.1", 3000, None).unwrap();
        assert!(d.record_route("job", node, None));
        assert!(d.forget_route("job"));
        assert!(!d.forget_route("job"));
    }

    #[test]
    fn hard_limit_accepts_three_then_rejects_until_commit() {
        let d = dispatcher().with_limits(ConcurrencyMonitor::new(Some(3)), FloodMonitor::new(0));

        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(!d.admit_if_not_rate_limited("t"));
    }

    #[tokio::test]
    async fn commit_releases_limiter_slots() {
        let d = dispatcher().with_limits(ConcurrencyMonitor::new(Some(1)), FloodMonitor::new(5));
        let node = d.pool().add("10.0.0.1", 3000, None).unwrap();

        assert!(d.admit_if_not_rate_limited("t"));
        assert_eq!(d.flood().count("t"), 1);
        assert!(d.record_route("job", node, Some("t".to_string())));
        assert!(!d.admit_if_not_rate_limited("t"));

        d.on_commit("job").await;
        assert_eq!(d.flood().count("t"), 0);
        assert!(d.admit_if_not_rate_limited("t"));
        // Route survives the commit: the node still serves the job's results.
        assert!(matches!(d.lookup_route("job"), Some(JobLocation::Routed(_))));
    }

    #[test]
    fn flooding_caller_is_rejected() {
        let d = dispatcher().with_limits(ConcurrencyMonitor::new(None), FloodMonitor::new(2));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(!d.admit_if_not_rate_limited("t"));
    }

    #[tokio::test]
    async fn removing_static_node_archives_its_jobs() {
        let port = spawn_node().await;
        let d = dispatcher();
        let node = d.pool().add("127.0.0.1", port, None).unwrap();
        assert!(d.record_route("job", node.clone(), None));

        assert!(d.remove_node(&node).await);
        assert!(!d.remove_node(&node).await);
        assert!(d.pool().is_empty());
        match d.lookup_route("job") {
            Some(JobLocation::Archived(record)) => {
                assert_eq!(record.task_info["status"]["code"], 20)
            }
            other => panic!("expected archived job, got {other:?}"),
        }
    }

    #[test]
    fn route_to_removed_node_is_refused() {
        let d = dispatcher();
        let node = d.pool().add("10.0.0.1", 3000, None).unwrap();
        assert!(d.pool().remove(&node));

        assert!(!d.record_route("job", node, None));
        assert!(d.routes().is_empty());
        assert!(d.lookup_route("job").is_none());
    }

    #[tokio::test]
    async fn repeated_commit_releases_slots_once() {
        let d = dispatcher().with_limits(ConcurrencyMonitor::new(Some(2)), FloodMonitor::new(0));
        let node = d.pool().add("10.0.0.1", 3000, None).unwrap();

        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.record_route("job-1", node.clone(), Some("t".to_string())));
        assert!(d.admit_if_not_rate_limited("t"));
        assert!(d.record_route("job-2", node, Some("t".to_string())));

        d.on_commit("job-1").await;
        d.on_commit("job-1").await;

        assert!(d.admit_if_not_rate_limited("t"));
        assert!(!d.admit_if_not_rate_limited("t"));
    }

    #[tokio::test]
    async fn routing_during_removal_is_refused() {
        let d = dispatcher();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let node = d.pool().add("127.0.0.1", port, None).unwrap();
        assert!(d.record_route("job", node.clone(), None));

        // The node's status endpoint is hit while its jobs are archived;
        // try to route a new job to it at that moment.
        let late = {
            let d = d.clone();
            let node = node.clone();
            move || {
                let d = d.clone();
                let node = node.clone();
                async move {
                    let routed = d.record_route("late", node, None);
                    Json(json!({"status": {"code": 20}, "lateRouted": routed}))
                }
            }
        };
        let app = axum::Router::new().route("/task/{id}/info", get(late));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        assert!(d.remove_node(&node).await);

        assert!(d.routes().is_empty());
        assert!(d.lookup_route("late").is_none());
        match d.lookup_route("job") {
            Some(JobLocation::Archived(record)) => {
                assert_eq!(record.task_info["lateRouted"], false)
            }
            other => panic!("expected archived job, got {other:?}"),
        }
    }
}
