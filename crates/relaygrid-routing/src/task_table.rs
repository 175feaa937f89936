//! Task table — durable snapshots of jobs that may outlive their node.
//!
//! Every read touches the record's access time. A periodic sweep drops
//! records nobody has read for [`TASK_RETENTION_SECS`]. The table is
//! rewritten to its snapshot store after each add, delete, touching read,
//! and sweep that changed something, so retention survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use relaygrid_state::{JobId, SnapshotStore, StateResult, TaskRecord, epoch_secs};

/// Records untouched for this long are evicted (2 days).
pub const TASK_RETENTION_SECS: u64 = 2 * 24 * 60 * 60;

/// How often [`TaskTable::run`] sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Persisted job id → archived status map.
#[derive(Clone)]
pub struct TaskTable {
    records: Arc<Mutex<HashMap<JobId, TaskRecord>>>,
    store: SnapshotStore,
}

impl TaskTable {
    /// Load from `store`; a missing snapshot is an empty table.
    pub fn open(store: SnapshotStore) -> StateResult<Self> {
        let records: HashMap<JobId, TaskRecord> = store.load()?.unwrap_or_default();
        info!(count = records.len(), "task table loaded");
        Ok(Self {
            records: Arc::new(Mutex::new(records)),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            store: SnapshotStore::in_memory(),
        }
    }

    /// Archive a job's status. Overwrites an earlier record for the same id.
    pub fn add(
        &self,
        job_id: &str,
        task_info: serde_json::Value,
        output: Option<Vec<String>>,
        token: Option<String>,
    ) {
        let record = TaskRecord {
            task_info,
            output,
            token,
            accessed: epoch_secs(),
        };
        self.records
            .lock()
            .expect("tasks lock")
            .insert(job_id.to_string(), record);
        debug!(job_id, "task archived");
        self.persist();
    }

    /// Read a record and refresh its access time.
    pub fn lookup(&self, job_id: &str) -> Option<TaskRecord> {
        let record = {
            let mut records = self.records.lock().expect("tasks lock");
            let record = records.get_mut(job_id)?;
            record.accessed = epoch_secs();
            record.clone()
        };
        self.persist();
        Some(record)
    }

    pub fn delete(&self, job_id: &str) -> bool {
        let removed = self
            .records
            .lock()
            .expect("tasks lock")
            .remove(job_id)
            .is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// All jobs submitted with `token`, sorted by job id.
    pub fn find_by_token(&self, token: &str) -> Vec<(JobId, TaskRecord)> {
        let records = self.records.lock().expect("tasks lock");
        let mut found: Vec<(JobId, TaskRecord)> = records
            .iter()
            .filter(|(_, r)| r.token.as_deref() == Some(token))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("tasks lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict expired records. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(epoch_secs())
    }

    /// [`sweep`](Self::sweep) with an explicit clock.
    pub fn sweep_at(&self, now: u64) -> usize {
        let removed = {
            let mut records = self.records.lock().expect("tasks lock");
            let before = records.len();
            records.retain(|_, r| now.saturating_sub(r.accessed) <= TASK_RETENTION_SECS);
            before - records.len()
        };

        if removed > 0 {
            info!(removed, "expired task records swept");
            self.persist();
        }
        removed
    }

    /// Sweep every [`SWEEP_INTERVAL`] until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    debug!("task sweeper shutting down");
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    fn set_accessed(&self, job_id: &str, at: u64) {
        if let Some(r) = self.records.lock().expect("tasks lock").get_mut(job_id) {
            r.accessed = at;
        }
    }

    fn persist(&self) {
        let result = self
            .store
            .save_with(|| self.records.lock().expect("tasks lock").clone());
        if let Err(e) = result {
            warn!(error = %e, "failed to persist task table");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_then_lookup_touches_access_time() {
        let table = TaskTable::in_memory();
        table.add("job-1", json!({"status": {"code": 40}}), None, None);
        table.set_accessed("job-1", 10);

        let record = table.lookup("job-1").unwrap();
        assert_eq!(record.task_info["status"]["code"], 40);
        assert!(record.accessed > 10);
    }

    #[test]
    fn lookup_touch_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let table = TaskTable::open(SnapshotStore::open(&path)).unwrap();
        table.add("job-1", json!({}), None, None);
        table.set_accessed("job-1", 10);
        table.persist();

        let stale = TaskTable::open(SnapshotStore::open(&path)).unwrap();
        assert_eq!(stale.records.lock().unwrap()["job-1"].accessed, 10);

        table.lookup("job-1").unwrap();
        let reloaded = TaskTable::open(SnapshotStore::open(&path)).unwrap();
        let accessed = reloaded.records.lock().unwrap()["job-1"].accessed;
        assert!(accessed > 10);
        assert_eq!(reloaded.sweep_at(accessed + 60), 0);
    }

    #[test]
    fn sweep_evicts_only_stale_records() {
        let table = TaskTable::in_memory();
        let now = 10_000_000;
        table.add("old", json!({}), None, None);
        table.add("fresh", json!({}), None, None);
        table.set_accessed("old", now - TASK_RETENTION_SECS - 1);
        table.set_accessed("fresh", now - TASK_RETENTION_SECS + 60);

        assert_eq!(table.sweep_at(now), 1);
        assert!(table.lookup("old").is_none());
        assert!(table.lookup("fresh").is_some());
    }

    #[test]
    fn find_by_token_filters_owner() {
        let table = TaskTable::in_memory();
        table.add("b", json!({}), None, Some("alice".to_string()));
        table.add("a", json!({}), None, Some("alice".to_string()));
        table.add("c", json!({}), None, Some("bob".to_string()));
        table.add("d", json!({}), None, None);

        let ids: Vec<String> = table
            .find_by_token("alice")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn delete_reports_presence() {
        let table = TaskTable::in_memory();
        table.add("job", json!({}), None, None);
        assert!(table.delete("job"));
        assert!(!table.delete("job"));
    }

    #[test]
    fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        {
            let table = TaskTable::open(SnapshotStore::open(&path)).unwrap();
            table.add(
                "job-1",
                json!({"uuid": "job-1"}),
                Some(vec!["line 1".to_string()]),
                Some("tok".to_string()),
            );
        }

        let table = TaskTable::open(SnapshotStore::open(&path)).unwrap();
        let record = table.lookup("job-1").unwrap();
        assert_eq!(record.output, Some(vec!["line 1".to_string()]));
        assert_eq!(record.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let table = TaskTable::in_memory();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { table.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
