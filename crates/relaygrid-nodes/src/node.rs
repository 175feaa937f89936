//! A single processing node.

use std::fmt;
use std::sync::{Arc, Mutex};

use relaygrid_state::{AutospawnInfo, NodeInfo, NodeRecord, epoch_secs};

use crate::client::NodeClient;
use crate::error::NodeResult;

/// A node is online while its last successful refresh is younger than this.
pub const ONLINE_WINDOW_SECS: u64 = 5 * 60;

/// Shared handle to a node. Identity is the allocation, not the address.
pub type NodeHandle = Arc<Node>;

#[derive(Debug, Default)]
struct NodeState {
    info: Option<NodeInfo>,
    last_refreshed: u64,
    locked: bool,
    autospawn: Option<AutospawnInfo>,
}

/// A processing backend reachable at `host:port`.
#[derive(Debug)]
pub struct Node {
    host: String,
    port: u16,
    token: Option<String>,
    state: Mutex<NodeState>,
}

impl Node {
    /// A node with no status snapshot yet.
    pub fn new(host: impl Into<String>, port: u16, token: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.filter(|t| !t.is_empty()),
            state: Mutex::new(NodeState::default()),
        }
    }

    /// Tag the node as created by the autoscaler.
    pub fn with_autospawn(self, autospawn: AutospawnInfo) -> Self {
        self.state.lock().expect("node lock").autospawn = Some(autospawn);
        self
    }

    /// Rebuild a node from its persisted form.
    pub fn from_record(record: NodeRecord) -> Self {
        let node = Self::new(record.host, record.port, record.token);
        {
            let mut state = node.state.lock().expect("node lock");
            state.info = record.info;
            state.last_refreshed = record.last_refreshed;
            state.locked = record.locked;
            state.autospawn = record.autospawn;
        }
        node
    }

    /// Persisted form of this node.
    pub fn to_record(&self) -> NodeRecord {
        let state = self.state.lock().expect("node lock");
        NodeRecord {
            host: self.host.clone(),
            port: self.port,
            token: self.token.clone(),
            info: state.info.clone(),
            last_refreshed: state.last_refreshed,
            locked: state.locked,
            autospawn: state.autospawn.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `host:port`, IPv6 hosts bracketed.
    pub fn address(&self) -> String {
        crate::client::authority(&self.host, self.port)
    }

    /// Last fetched status snapshot.
    pub fn info(&self) -> Option<NodeInfo> {
        self.state.lock().expect("node lock").info.clone()
    }

    /// Unix timestamp of the last successful refresh, 0 if never refreshed.
    pub fn last_refreshed(&self) -> u64 {
        self.state.lock().expect("node lock").last_refreshed
    }

    pub fn is_online(&self) -> bool {
        self.is_online_at(epoch_secs())
    }

    /// Whether the last successful refresh is within [`ONLINE_WINDOW_SECS`] of `now`.
    pub fn is_online_at(&self, now: u64) -> bool {
        let last = self.last_refreshed();
        last > 0 && now.saturating_sub(last) < ONLINE_WINDOW_SECS
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().expect("node lock").locked
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        self.state.lock().expect("node lock").locked = locked;
    }

    pub fn autospawn(&self) -> Option<AutospawnInfo> {
        self.state.lock().expect("node lock").autospawn.clone()
    }

    pub fn is_autospawned(&self) -> bool {
        self.state.lock().expect("node lock").autospawn.is_some()
    }

    /// Current queue length from the snapshot (0 without one).
    pub fn queue_count(&self) -> u32 {
        self.info().map(|i| i.task_queue_count).unwrap_or(0)
    }

    /// Queue-to-capacity ratio, if a snapshot exists.
    pub fn load_ratio(&self) -> Option<f64> {
        self.info().map(|i| i.load_ratio())
    }

    /// Whether the last snapshot says the node takes a job of `job_size`.
    pub fn accepts(&self, job_size: u32) -> bool {
        self.info().is_some_and(|i| i.accepts(job_size))
    }

    /// Store a successful refresh result taken at `at`.
    pub fn record_refresh(&self, info: NodeInfo, at: u64) {
        let mut state = self.state.lock().expect("node lock");
        state.info = Some(info);
        state.last_refreshed = at;
    }

    /// Fetch a fresh snapshot. On failure the previous one is kept and the
    /// refresh timestamp does not advance.
    pub async fn refresh(&self, client: &NodeClient) -> NodeResult<()> {
        let info = client.info(self).await?;
        self.record_refresh(info, epoch_secs());
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn info(queue: u32, parallel: u32) -> NodeInfo {
        NodeInfo {
            task_queue_count: queue,
            max_parallel_tasks: parallel,
            ..Default::default()
        }
    }

    #[test]
    fn never_refreshed_is_offline() {
        let node = Node::new("10.0.0.1", 3000, None);
        assert!(!node.is_online());
        assert!(node.info().is_none());
        assert!(!node.accepts(1));
    }

    #[test]
    fn online_window_boundaries() {
        let node = Node::new("10.0.0.1", 3000, None);
        let now = 1_000_000;

        node.record_refresh(info(0, 1), now - (ONLINE_WINDOW_SECS - 1));
        assert!(node.is_online_at(now));

        node.record_refresh(info(0, 1), now - ONLINE_WINDOW_SECS);
        assert!(!node.is_online_at(now));

        node.record_refresh(info(0, 1), now - 10 * ONLINE_WINDOW_SECS);
        assert!(!node.is_online_at(now));
    }

    #[tokio::test]
    async fn failed_refresh_does_not_advance_timestamp() {
        let node = Node::new("127.0.0.1", 1, None);
        let stale = epoch_secs() - 60;
        node.record_refresh(info(3, 2), stale);

        let client = NodeClient::new().with_timeout(Duration::from_millis(300));
        assert!(node.refresh(&client).await.is_err());

        assert_eq!(node.last_refreshed(), stale);
        assert_eq!(node.queue_count(), 3);
        assert!(node.is_online());
    }

    #[test]
    fn record_round_trip_keeps_tags() {
        let autospawn = AutospawnInfo {
            machine_name: "relaygrid-abc".to_string(),
            created_at: 100,
            max_runtime: 3600,
            max_upload_time: -1,
        };
        let node = Node::new("10.0.0.1", 3000, Some("tok".to_string())).with_autospawn(autospawn);
        node.set_locked(true);
        node.record_refresh(info(1, 2), 500);

        let restored = Node::from_record(node.to_record());
        assert_eq!(restored.token(), Some("tok"));
        assert!(restored.is_locked());
        assert!(restored.is_autospawned());
        assert_eq!(restored.last_refreshed(), 500);
        assert_eq!(restored.load_ratio(), Some(0.5));
    }

    #[test]
    fn empty_token_is_none() {
        let node = Node::new("h", 1, Some(String::new()));
        assert_eq!(node.token(), None);
        assert_eq!(node.to_string(), "h:1");
        assert_eq!(node.address(), "h:1");
    }
}
