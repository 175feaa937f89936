//! Domain types shared across relaygrid crates.
//!
//! `NodeInfo` mirrors the JSON document a processing node returns from its
//! `/info` endpoint. `NodeRecord` and `TaskRecord` are the persisted forms of
//! pool entries and archived jobs.

use serde::{Deserialize, Serialize};

/// Opaque job identifier assigned by a processing node.
pub type JobId = String;

// ── Node status ───────────────────────────────────────────────────

/// Capability and load snapshot reported by a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// API version of the node software.
    #[serde(default)]
    pub version: String,
    /// Number of jobs queued or running on the node.
    #[serde(default)]
    pub task_queue_count: u32,
    /// How many jobs the node processes concurrently.
    #[serde(default)]
    pub max_parallel_tasks: u32,
    /// Largest job (in input images) the node accepts. `None` = unlimited.
    #[serde(default)]
    pub max_images: Option<u32>,
    /// Processing engine name.
    #[serde(default)]
    pub engine: String,
    /// Processing engine version.
    #[serde(default)]
    pub engine_version: String,
    #[serde(default)]
    pub available_memory: Option<u64>,
    #[serde(default)]
    pub total_memory: Option<u64>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
}

impl NodeInfo {
    /// Queue length relative to parallel capacity. Lower is less loaded.
    pub fn load_ratio(&self) -> f64 {
        f64::from(self.task_queue_count) / f64::from(self.max_parallel_tasks.max(1))
    }

    /// Whether the queue is below parallel capacity (0 counts as 1).
    pub fn has_free_slot(&self) -> bool {
        self.task_queue_count < self.max_parallel_tasks.max(1)
    }

    /// Whether the node's advertised image limit admits a job of `job_size`.
    pub fn accepts(&self, job_size: u32) -> bool {
        self.max_images.is_none_or(|max| max >= job_size)
    }
}

// ── Autospawn ─────────────────────────────────────────────────────

/// Tags carried by nodes that the autoscaler created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutospawnInfo {
    /// Cloud-machine handle used by the machine driver.
    pub machine_name: String,
    /// Unix timestamp (seconds) when the machine was created.
    pub created_at: u64,
    /// Maximum lifetime in seconds. `<= 0` disables the check.
    pub max_runtime: i64,
    /// Maximum idle time after creation in seconds. `<= 0` disables the check.
    pub max_upload_time: i64,
}

// ── Persisted records ─────────────────────────────────────────────

/// Persisted form of a pool entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub info: Option<NodeInfo>,
    /// Unix timestamp (seconds) of the last successful refresh, 0 if never.
    #[serde(default)]
    pub last_refreshed: u64,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub autospawn: Option<AutospawnInfo>,
}

/// Archived status of a job whose node may no longer exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Last known task info document, as returned by the node.
    pub task_info: serde_json::Value,
    /// Captured console output, if it was fetched.
    #[serde(default)]
    pub output: Option<Vec<String>>,
    /// Token of the caller that submitted the job.
    #[serde(default)]
    pub token: Option<String>,
    /// Unix timestamp (seconds) of the last lookup or write.
    pub accessed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_parses_camel_case() {
        let info: NodeInfo = serde_json::from_str(
            r#"{"version":"2.2.0","taskQueueCount":3,"maxParallelTasks":2,
                "maxImages":null,"engine":"odm","engineVersion":"3.1.0"}"#,
        )
        .unwrap();

        assert_eq!(info.task_queue_count, 3);
        assert_eq!(info.max_parallel_tasks, 2);
        assert_eq!(info.max_images, None);
        assert_eq!(info.engine_version, "3.1.0");
    }

    #[test]
    fn node_info_tolerates_missing_fields() {
        let info: NodeInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info, NodeInfo::default());
    }

    #[test]
    fn load_ratio_treats_zero_parallelism_as_one() {
        let info = NodeInfo {
            task_queue_count: 2,
            max_parallel_tasks: 0,
            ..Default::default()
        };
        assert_eq!(info.load_ratio(), 2.0);
    }

    #[test]
    fn accepts_respects_max_images() {
        let mut info = NodeInfo::default();
        assert!(info.accepts(10_000));

        info.max_images = Some(500);
        assert!(info.accepts(500));
        assert!(!info.accepts(501));
    }
}
