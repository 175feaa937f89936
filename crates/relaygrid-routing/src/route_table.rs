//! Route table — live binding of job ids to the node running them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use relaygrid_nodes::NodeHandle;
use relaygrid_state::JobId;

/// Where a job was dispatched, and on whose behalf.
#[derive(Debug, Clone)]
pub struct Route {
    pub node: NodeHandle,
    pub token: Option<String>,
    /// Set once the node has reported the job finished.
    pub committed: bool,
}

/// Thread-safe job id → route map.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<HashMap<JobId, Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `job_id` to `node`. Replaces any previous binding.
    pub fn add(&self, job_id: &str, node: NodeHandle, token: Option<String>) {
        debug!(job_id, node = %node, "route added");
        self.routes
            .write()
            .expect("routes lock")
            .insert(
                job_id.to_string(),
                Route {
                    node,
                    token,
                    committed: false,
                },
            );
    }

    pub fn lookup(&self, job_id: &str) -> Option<Route> {
        self.routes.read().expect("routes lock").get(job_id).cloned()
    }

    /// Flag a job as finished. Returns its route the first time only; a
    /// repeated commit or an unknown job yields `None`.
    pub fn mark_committed(&self, job_id: &str) -> Option<Route> {
        let mut routes = self.routes.write().expect("routes lock");
        let route = routes.get_mut(job_id)?;
        if route.committed {
            return None;
        }
        route.committed = true;
        Some(route.clone())
    }

    /// Forget a single job. Returns the route it had.
    pub fn remove(&self, job_id: &str) -> Option<Route> {
        self.routes.write().expect("routes lock").remove(job_id)
    }

    /// Drop every route that points at `node`. Returns how many were removed.
    pub fn remove_by_node(&self, node: &NodeHandle) -> usize {
        let mut routes = self.routes.write().expect("routes lock");
        let before = routes.len();
        routes.retain(|_, route| !Arc::ptr_eq(&route.node, node));
        let removed = before - routes.len();
        if removed > 0 {
            debug!(node = %node, removed, "routes purged for node");
        }
        removed
    }

    /// Job ids currently routed to `node`, with their caller tokens.
    pub fn jobs_for_node(&self, node: &NodeHandle) -> Vec<(JobId, Option<String>)> {
        self.routes
            .read()
            .expect("routes lock")
            .iter()
            .filter(|(_, route)| Arc::ptr_eq(&route.node, node))
            .map(|(id, route)| (id.clone(), route.token.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.read().expect("routes lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygrid_nodes::Node;

    fn node(host: &str) -> NodeHandle {
        Arc::new(Node::new(host, 3000, None))
    }

    #[test]
    fn add_then_lookup() {
        let table = RouteTable::new();
        let a = node("10.0.0.1");
        table.add("job-1", a.clone(), Some("caller".to_string()));

        let route = table.lookup("job-1").unwrap();
        assert!(Arc::ptr_eq(&route.node, &a));
        assert_eq!(route.token.as_deref(), Some("caller"));
        assert!(table.lookup("job-2").is_none());
    }

    #[test]
    fn commit_is_marked_once() {
        let table = RouteTable::new();
        table.add("job", node("10.0.0.1"), Some("t".to_string()));

        let first = table.mark_committed("job").unwrap();
        assert_eq!(first.token.as_deref(), Some("t"));
        assert!(table.mark_committed("job").is_none());
        assert!(table.lookup("job").unwrap().committed);
        assert!(table.mark_committed("missing").is_none());

        // A re-dispatched job starts uncommitted.
        table.add("job", node("10.0.0.2"), None);
        assert!(table.mark_committed("job").is_some());
    }

    #[test]
    fn remove_by_node_purges_only_that_node() {
        let table = RouteTable::new();
        let a = node("10.0.0.1");
        let b = node("10.0.0.2");
        table.add("a1", a.clone(), None);
        table.add("a2", a.clone(), None);
        table.add("b1", b.clone(), None);

        assert_eq!(table.remove_by_node(&a), 2);
        assert!(table.lookup("a1").is_none());
        assert!(table.lookup("a2").is_none());
        assert!(Arc::ptr_eq(&table.lookup("b1").unwrap().node, &b));
        assert_eq!(table.remove_by_node(&a), 0);
    }

    #[test]
    fn remove_by_node_uses_identity_not_address() {
        let table = RouteTable::new();
        let a = node("10.0.0.1");
        let twin = node("10.0.0.1");
        table.add("a1", a, None);

        assert_eq!(table.remove_by_node(&twin), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn jobs_for_node_lists_tokens() {
        let table = RouteTable::new();
        let a = node("10.0.0.1");
        table.add("a1", a.clone(), Some("t1".to_string()));
        table.add("b1", node("10.0.0.2"), None);

        let jobs = table.jobs_for_node(&a);
        assert_eq!(jobs, vec![("a1".to_string(), Some("t1".to_string()))]);
    }

    #[test]
    fn remove_single_route() {
        let table = RouteTable::new();
        table.add("a1", node("10.0.0.1"), None);
        assert!(table.remove("a1").is_some());
        assert!(table.remove("a1").is_none());
        assert!(table.is_empty());
    }
}
