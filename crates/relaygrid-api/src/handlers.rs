//! REST API handlers.
//!
//! Handlers go through the `Dispatcher` so that limiter, route, and
//! autoscaler bookkeeping stay consistent with the proxy path.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use relaygrid_nodes::NodeHandle;
use relaygrid_scheduler::JobLocation;
use relaygrid_state::{AutospawnInfo, NodeInfo};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Views ──────────────────────────────────────────────────────

/// One pool entry as shown to operators. Node tokens are never echoed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub index: usize,
    pub host: String,
    pub port: u16,
    pub online: bool,
    pub locked: bool,
    pub last_refreshed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<NodeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autospawn: Option<AutospawnInfo>,
}

impl NodeView {
    fn new(index: usize, node: &NodeHandle) -> Self {
        Self {
            index,
            host: node.host().to_string(),
            port: node.port(),
            online: node.is_online(),
            locked: node.is_locked(),
            last_refreshed: node.last_refreshed(),
            info: node.info(),
            autospawn: node.autospawn(),
        }
    }
}

/// Where a job is answered from.
#[derive(Debug, Serialize)]
#[serde(tag = "location", rename_all = "camelCase")]
pub enum JobView {
    #[serde(rename_all = "camelCase")]
    Routed { node: String },
    #[serde(rename_all = "camelCase")]
    Archived {
        task_info: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Vec<String>>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub uuid: String,
    pub task_info: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    #[serde(default)]
    pub token: Option<String>,
}

// ── Webhook ────────────────────────────────────────────────────

/// POST /commit/{token}
pub async fn commit(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    Json(req): Json<CommitRequest>,
) -> impl IntoResponse {
    if token != state.callback_token {
        warn!(job_id = %req.uuid, "commit with invalid callback token");
        return error_response("invalid callback token", StatusCode::UNAUTHORIZED).into_response();
    }
    debug!(job_id = %req.uuid, "job committed");
    state.dispatcher.on_commit(&req.uuid).await;
    ApiResponse::ok(req.uuid).into_response()
}

// ── Pool ───────────────────────────────────────────────────────

/// GET /api/v1/info
pub async fn pool_info(State(state): State<ApiState>) -> impl IntoResponse {
    match state.dispatcher.pool().reference_node().and_then(|n| n.info()) {
        Some(info) => ApiResponse::ok(info).into_response(),
        None => error_response("no online node", StatusCode::SERVICE_UNAVAILABLE).into_response(),
    }
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    let nodes: Vec<NodeView> = state
        .dispatcher
        .pool()
        .list()
        .iter()
        .enumerate()
        .map(|(i, n)| NodeView::new(i, n))
        .collect();
    ApiResponse::ok(nodes)
}

/// POST /api/v1/nodes
pub async fn add_node(
    State(state): State<ApiState>,
    Json(req): Json<AddNodeRequest>,
) -> impl IntoResponse {
    if req.host.trim().is_empty() || req.port == 0 {
        return error_response("host and a non-zero port are required", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let pool = state.dispatcher.pool();
    match pool.add(&req.host, req.port, req.token) {
        Some(node) => {
            info!(node = %node, "node added");
            let index = pool.len().saturating_sub(1);
            (StatusCode::CREATED, ApiResponse::ok(NodeView::new(index, &node))).into_response()
        }
        None => error_response("node already in pool", StatusCode::CONFLICT).into_response(),
    }
}

/// DELETE /api/v1/nodes/{index}
pub async fn remove_node(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let Some(node) = state.dispatcher.pool().get(index) else {
        return error_response("node not found", StatusCode::NOT_FOUND).into_response();
    };
    if state.dispatcher.remove_node(&node).await {
        info!(node = %node, "node removed");
        ApiResponse::ok(node.address()).into_response()
    } else {
        error_response("node not found", StatusCode::NOT_FOUND).into_response()
    }
}

/// POST /api/v1/nodes/{index}/lock
pub async fn lock_node(state: State<ApiState>, index: Path<usize>) -> impl IntoResponse {
    set_locked(state, index, true)
}

/// POST /api/v1/nodes/{index}/unlock
pub async fn unlock_node(state: State<ApiState>, index: Path<usize>) -> impl IntoResponse {
    set_locked(state, index, false)
}

fn set_locked(
    State(state): State<ApiState>,
    Path(index): Path<usize>,
    locked: bool,
) -> axum::response::Response {
    let pool = state.dispatcher.pool();
    match pool.get(index) {
        Some(node) if pool.set_locked(&node, locked) => {
            ApiResponse::ok(NodeView::new(index, &node)).into_response()
        }
        _ => error_response("node not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.dispatcher.lookup_route(&id) {
        Some(JobLocation::Routed(route)) => ApiResponse::ok(JobView::Routed {
            node: route.node.address(),
        })
        .into_response(),
        Some(JobLocation::Archived(record)) => ApiResponse::ok(JobView::Archived {
            task_info: record.task_info,
            output: record.output,
        })
        .into_response(),
        None => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /api/v1/tasks?token=
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<TasksQuery>,
) -> impl IntoResponse {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return error_response("token is required", StatusCode::BAD_REQUEST).into_response();
    };
    let tasks: Vec<TaskView> = state
        .dispatcher
        .tasks()
        .find_by_token(&token)
        .into_iter()
        .map(|(uuid, record)| TaskView {
            uuid,
            task_info: record.task_info,
        })
        .collect();
    ApiResponse::ok(tasks).into_response()
}
