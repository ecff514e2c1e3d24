//! Serving a tool catalog over the protocol envelope.
//!
//! Anything that can list and call tools implements [`ToolService`]; the
//! helpers here expose such a service over line-delimited stdio and over
//! HTTP, so the federation proxy and the meta-tool façade share one
//! serving path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::types::{JsonRpcResponse, ToolDefinition, ToolResult, METHOD_NOT_FOUND};
use crate::McpError;

/// A request/response tool endpoint.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Tool definitions this service exposes.
    async fn service_tools(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool; failures are in-band results, never transport faults.
    async fn service_call(
        &self,
        name: &str,
        arguments: Value,
        deadline: Option<Duration>,
    ) -> ToolResult;
}

/// Dispatch one JSON-RPC request against a service.
pub async fn handle_request(service: &dyn ToolService, request: Value) -> Value {
    let method = request["method"].as_str().unwrap_or("");
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "serverInfo": { "name": "toolgate", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} }
        }),
        "tools/list" => {
            json!({ "tools": service.service_tools().await })
        }
        "tools/call" => {
            let name = request["params"]["name"].as_str().unwrap_or("");
            let arguments = request["params"]["arguments"].clone();
            let result = service.service_call(name, arguments, None).await;
            serde_json::to_value(result).unwrap_or(Value::Null)
        }
        _ => {
            let response = JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            );
            return serde_json::to_value(response).unwrap_or(Value::Null);
        }
    };

    serde_json::to_value(JsonRpcResponse::success(id, result)).unwrap_or(Value::Null)
}

/// Serve a service over stdin/stdout, one JSON message per line.
///
/// Returns when stdin reaches end of file.
pub async fn serve_stdio(service: Arc<dyn ToolService>) -> Result<(), McpError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("serving tool protocol on stdio");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!("discarding unparsable request line: {e}");
                continue;
            }
        };

        // Requests without an id are notifications; nothing to answer.
        if request.get("id").is_none() {
            continue;
        }

        let response = handle_request(service.as_ref(), request).await;
        let mut out = serde_json::to_string(&response)
            .map_err(|e| McpError::SerializationError(e.to_string()))?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn http_rpc(
    State(service): State<Arc<dyn ToolService>>,
    Json(request): Json<Value>,
) -> Json<Value> {
    Json(handle_request(service.as_ref(), request).await)
}

async fn http_health(State(service): State<Arc<dyn ToolService>>) -> Json<Value> {
    let count = service.service_tools().await.len();
    Json(json!({ "status": "ok", "tools": count }))
}

/// Build the HTTP router: `POST /mcp` for the envelope, `GET /health`
/// for the sandbox manager's probe.
pub fn http_router(service: Arc<dyn ToolService>) -> Router {
    Router::new()
        .route("/mcp", post(http_rpc))
        .route("/health", get(http_health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(service)
}

/// Bind and serve the HTTP endpoint until the process exits.
pub async fn serve_http(service: Arc<dyn ToolService>, port: u16) -> Result<(), McpError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("serving tool protocol on http://{addr}/mcp");
    axum::serve(listener, http_router(service))
        .await
        .map_err(|e| McpError::TransportError(e.to_string()))
}
