//! relaygrid-api — HTTP surface of the orchestrator.
//!
//! Nodes call the commit webhook when a job finishes; operators manage
//! the pool and look up jobs through the `/api/v1` routes. All responses
//! use the `{success, data?, error?}` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/commit/{callback_token}` | Node webhook: job finished (`{"uuid": ...}`) |
//! | GET | `/api/v1/info` | Status snapshot of the reference node |
//! | GET | `/api/v1/nodes` | List nodes |
//! | POST | `/api/v1/nodes` | Add a static node |
//! | DELETE | `/api/v1/nodes/{index}` | Remove a node |
//! | POST | `/api/v1/nodes/{index}/lock` | Exclude a node from selection |
//! | POST | `/api/v1/nodes/{index}/unlock` | Re-include a node |
//! | GET | `/api/v1/jobs/{id}` | Where a job lives |
//! | GET | `/api/v1/tasks?token=` | Archived jobs of a caller |

pub mod handlers;

use axum::Router;
use axum::routing::{delete, get, post};

use relaygrid_scheduler::Dispatcher;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    /// Secret path segment nodes must present on the commit webhook.
    pub callback_token: String,
}

/// Build the complete router.
pub fn build_router(dispatcher: Dispatcher, callback_token: String) -> Router {
    let state = ApiState {
        dispatcher,
        callback_token,
    };

    let api_routes = Router::new()
        .route("/info", get(handlers::pool_info))
        .route("/nodes", get(handlers::list_nodes).post(handlers::add_node))
        .route("/nodes/{index}", delete(handlers::remove_node))
        .route("/nodes/{index}/lock", post(handlers::lock_node))
        .route("/nodes/{index}/unlock", post(handlers::unlock_node))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/tasks", get(handlers::list_tasks))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/commit/{token}", post(handlers::commit).with_state(state))
}
