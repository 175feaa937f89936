//! Route → task handoff for nodes that are about to disappear.

use serde_json::json;
use tracing::debug;

use relaygrid_nodes::{NodeClient, NodeHandle};

use crate::route_table::RouteTable;
use crate::task_table::TaskTable;

/// Status code a node reports for a failed job.
pub const STATUS_FAILED: u32 = 30;

/// Archive every job routed to `node` that the task table does not know
/// yet. The node's live status is used when it answers; otherwise a failed
/// status is recorded. Routes are left in place for the caller to purge.
/// Returns how many jobs were archived.
pub async fn archive_routes(
    routes: &RouteTable,
    tasks: &TaskTable,
    client: &NodeClient,
    node: &NodeHandle,
) -> usize {
    let mut archived = 0;
    for (job_id, token) in routes.jobs_for_node(node) {
        if tasks.lookup(&job_id).is_some() {
            continue;
        }
        let info = match client.task_info(node, &job_id).await {
            Ok(info) => info,
            Err(e) => {
                debug!(%job_id, node = %node, error = %e, "archiving job without live status");
                json!({
                    "uuid": job_id,
                    "status": { "code": STATUS_FAILED },
                    "error": "node was destroyed"
                })
            }
        };
        tasks.add(&job_id, info, None, token);
        archived += 1;
    }
    archived
}
