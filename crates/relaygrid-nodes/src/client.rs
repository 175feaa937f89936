//! HTTP client for node status and task endpoints.
//!
//! Each call opens a plain HTTP/1.1 connection, issues one GET, and decodes
//! the JSON body, all under a per-call timeout. Nodes answer some failures
//! with a 200 and an `{"error": "..."}` body; those surface as
//! [`NodeError::Remote`].

use std::time::Duration;

use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use relaygrid_state::NodeInfo;

use crate::error::{NodeError, NodeResult};
use crate::node::Node;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stateless client for node HTTP endpoints.
#[derive(Debug, Clone)]
pub struct NodeClient {
    timeout: Duration,
}

impl NodeClient {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the node's capability and load snapshot (`GET /info`).
    pub async fn info(&self, node: &Node) -> NodeResult<NodeInfo> {
        self.get_json(node.host(), node.port(), &with_token("/info", node.token()))
            .await
    }

    /// Fetch a job's status document (`GET /task/{id}/info`).
    pub async fn task_info(&self, node: &Node, job_id: &str) -> NodeResult<serde_json::Value> {
        let path = format!("/task/{}/info", encode(job_id));
        self.get_json(node.host(), node.port(), &with_token(&path, node.token()))
            .await
    }

    /// Fetch a job's console output starting at `line`
    /// (negative values count from the end).
    pub async fn task_output(&self, node: &Node, job_id: &str, line: i64) -> NodeResult<Vec<String>> {
        let path = format!("/task/{}/output?line={line}", encode(job_id));
        self.get_json(node.host(), node.port(), &with_token(&path, node.token()))
            .await
    }

    /// GET `path_and_query` from `host:port` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        host: &str,
        port: u16,
        path_and_query: &str,
    ) -> NodeResult<T> {
        let address = authority(host, port);

        let result = tokio::time::timeout(self.timeout, fetch(&address, path_and_query)).await;
        let body = match result {
            Ok(body) => body?,
            Err(_) => {
                debug!(%address, path = path_and_query, "node request timed out");
                return Err(NodeError::Timeout {
                    address,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| NodeError::Decode {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return Err(NodeError::Remote {
                address,
                message: message.to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| NodeError::Decode {
            address,
            reason: e.to_string(),
        })
    }
}

impl Default for NodeClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch(address: &str, path_and_query: &str) -> NodeResult<bytes::Bytes> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| NodeError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| request_err(address, e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path_and_query)
        .header("host", address)
        .header("accept", "application/json")
        .header("user-agent", "relaygrid/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| request_err(address, e))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| request_err(address, e))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| request_err(address, e))?
        .to_bytes();

    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        return Err(NodeError::Status {
            address: address.to_string(),
            status: status.as_u16(),
            body: text.chars().take(200).collect(),
        });
    }

    Ok(body)
}

/// `host:port`, with IPv6 literals bracketed.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn request_err(address: &str, e: impl std::fmt::Display) -> NodeError {
    NodeError::Request {
        address: address.to_string(),
        reason: e.to_string(),
    }
}

/// Append the node's access token to a path, if it has one.
fn with_token(path: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => {
            let sep = if path.contains('?') { '&' } else { '?' };
            format!("{path}{sep}token={}", encode(token))
        }
        _ => path.to_string(),
    }
}

/// Percent-encode everything outside the URL unreserved set.
fn encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::Json;
    use axum::extract::{Path, Query};
    use axum::routing::get;

    async fn info_handler(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        if q.get("token").map(String::as_str) != Some("s3cret") {
            return Json(serde_json::json!({ "error": "Invalid authentication token" }));
        }
        Json(serde_json::json!({
            "version": "2.2.1",
            "taskQueueCount": 2,
            "maxParallelTasks": 4,
            "maxImages": 800,
            "engine": "odm",
            "engineVersion": "3.3.0"
        }))
    }

    async fn output_handler(
        Path(id): Path<String>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<Vec<String>> {
        let line = q.get("line").cloned().unwrap_or_default();
        Json(vec![format!("{id} from line {line}")])
    }

    async fn spawn_node() -> u16 {
        let app = axum::Router::new()
            .route("/info", get(info_handler))
            .route("/task/{id}/output", get(output_handler))
            .route(
                "/task/{id}/info",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[test]
    fn authority_brackets_ipv6_literals() {
        assert_eq!(authority("10.0.0.1", 3000), "10.0.0.1:3000");
        assert_eq!(authority("node.example", 80), "node.example:80");
        assert_eq!(authority("::1", 3000), "[::1]:3000");
        assert_eq!(authority("fe80::2", 3001), "[fe80::2]:3001");
        assert_eq!(authority("[::1]", 3000), "[::1]:3000");
    }

    #[tokio::test]
    async fn reaches_node_on_ipv6_loopback() {
        // Hosts without IPv6 cannot bind ::1; nothing to exercise there.
        let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        let app = axum::Router::new().route("/info", get(info_handler));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let node = Node::new("::1", port, Some("s3cret".to_string()));
        assert_eq!(node.address(), format!("[::1]:{port}"));
        let info = NodeClient::new().info(&node).await.unwrap();
        assert_eq!(info.max_images, Some(800));
    }

    #[tokio::test]
    async fn info_sends_token_and_decodes() {
        let port = spawn_node().await;
        let node = Node::new("127.0.0.1", port, Some("s3cret".to_string()));

        let info = NodeClient::new().info(&node).await.unwrap();
        assert_eq!(info.task_queue_count, 2);
        assert_eq!(info.max_parallel_tasks, 4);
        assert_eq!(info.max_images, Some(800));
    }

    #[tokio::test]
    async fn error_body_is_remote_error() {
        let port = spawn_node().await;
        let node = Node::new("127.0.0.1", port, Some("wrong".to_string()));

        let err = NodeClient::new().info(&node).await.unwrap_err();
        assert!(matches!(err, NodeError::Remote { ref message, .. } if message.contains("token")));
    }

    #[tokio::test]
    async fn non_2xx_is_status_error() {
        let port = spawn_node().await;
        let node = Node::new("127.0.0.1", port, None);

        let err = NodeClient::new().task_info(&node, "abc").await.unwrap_err();
        assert!(matches!(err, NodeError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn task_output_passes_line_offset() {
        let port = spawn_node().await;
        let node = Node::new("127.0.0.1", port, None);

        let lines = NodeClient::new().task_output(&node, "job-1", -50).await.unwrap();
        assert_eq!(lines, vec!["job-1 from line -50".to_string()]);
    }

    #[tokio::test]
    async fn closed_port_is_connect_error() {
        let node = Node::new("127.0.0.1", 1, None);
        let err = NodeClient::new()
            .with_timeout(Duration::from_millis(500))
            .info(&node)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Connect { .. } | NodeError::Timeout { .. }));
    }

    #[test]
    fn with_token_appends_query() {
        assert_eq!(with_token("/info", None), "/info");
        assert_eq!(with_token("/info", Some("")), "/info");
        assert_eq!(with_token("/info", Some("a b")), "/info?token=a%20b");
        assert_eq!(
            with_token("/task/1/output?line=0", Some("t")),
            "/task/1/output?line=0&token=t"
        );
    }
}
