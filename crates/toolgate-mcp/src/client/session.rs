//! Backend sessions.
//!
//! A session owns exactly one transport. Once a transport faults the
//! session is demoted to `Failed` and never revived in-process; the
//! proxy reacts by evicting the session's tools from the catalog.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::client::config::{BackendConfig, TransportKind};
use crate::client::credentials::CredentialProvider;
use crate::client::transport::{
    SseTransport, StdioTransport, StreamableHttpTransport, Transport,
};
use crate::types::{ToolDefinition, ToolResult};
use crate::McpError;

/// Lifecycle state of a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Authenticating,
    Failed,
}

/// One live connection to a backend, plus its discovered tools.
pub struct BackendSession {
    name: String,
    transport: Box<dyn Transport>,
    state: RwLock<SessionState>,
    tools: Vec<ToolDefinition>,
    call_timeout: Duration,
}

impl BackendSession {
    /// Open a session: connect, handshake, discover tools.
    ///
    /// Remote backends that answer 401 hand control to the credential
    /// provider; the connect is then retried exactly once with the fresh
    /// token. A second rejection fails the backend.
    #[instrument(skip(config, credentials), fields(backend = %name))]
    pub async fn open(
        name: &str,
        config: &BackendConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<Self, McpError> {
        let call_timeout = Duration::from_millis(config.timeout_ms);

        match config.transport_kind() {
            TransportKind::Stdio => {
                let command = config.command.as_deref().ok_or_else(|| {
                    McpError::InvalidConfig(format!("backend {name} has no command"))
                })?;
                let transport = StdioTransport::spawn(command, &config.args, &config.env)?;
                Self::finish_open(name, Box::new(transport), call_timeout).await
            }
            TransportKind::StreamableHttp | TransportKind::Sse => {
                let url = config.url.as_deref().ok_or_else(|| {
                    McpError::InvalidConfig(format!("backend {name} has no url"))
                })?;

                let bearer = match &credentials {
                    Some(provider) => provider.access_token(name).await,
                    None => None,
                };

                match Self::open_remote(name, config, url, bearer.as_deref(), call_timeout).await
                {
                    Err(McpError::Unauthorized(_)) => {
                        let provider = credentials.ok_or_else(|| {
                            McpError::ConnectionFailed(format!(
                                "backend {name} requires authorization but no broker is configured"
                            ))
                        })?;

                        info!(backend = name, "backend rejected connection, starting authorization");
                        let token = provider.authorize(name, url).await?;

                        // One retry with the new credential; a second 401
                        // is treated as backend-unreachable.
                        Self::open_remote(name, config, url, Some(&token), call_timeout)
                            .await
                            .map_err(|e| match e {
                                McpError::Unauthorized(url) => McpError::ConnectionFailed(
                                    format!("still unauthorized after token grant: {url}"),
                                ),
                                other => other,
                            })
                    }
                    other => other,
                }
            }
        }
    }

    async fn open_remote(
        name: &str,
        config: &BackendConfig,
        url: &str,
        bearer: Option<&str>,
        call_timeout: Duration,
    ) -> Result<Self, McpError> {
        let transport: Box<dyn Transport> = match config.transport_kind() {
            TransportKind::Sse => Box::new(
                SseTransport::connect(url, &config.headers, bearer, config.timeout_ms).await?,
            ),
            _ => Box::new(StreamableHttpTransport::connect(
                url,
                &config.headers,
                bearer,
                config.timeout_ms,
            )?),
        };
        Self::finish_open(name, transport, call_timeout).await
    }

    async fn finish_open(
        name: &str,
        transport: Box<dyn Transport>,
        call_timeout: Duration,
    ) -> Result<Self, McpError> {
        // Some stateless backends skip the handshake; tolerate a
        // method-level rejection but not a transport fault.
        match transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2025-03-26",
                    "clientInfo": { "name": "toolgate", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": {}
                }),
            )
            .await
        {
            Ok(_) => {}
            Err(McpError::CallFailed(reason)) => {
                debug!(backend = name, %reason, "backend declined initialize");
            }
            Err(McpError::Unauthorized(url)) => return Err(McpError::Unauthorized(url)),
            Err(e) => return Err(McpError::HandshakeFailed(e.to_string())),
        }

        let tools = Self::discover(&*transport).await?;
        info!(backend = name, count = tools.len(), "discovered tools");

        Ok(Self {
            name: name.to_string(),
            transport,
            state: RwLock::new(SessionState::Ready),
            tools,
            call_timeout,
        })
    }

    async fn discover(transport: &dyn Transport) -> Result<Vec<ToolDefinition>, McpError> {
        let result = transport.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| McpError::DiscoveryFailed("No tools in response".to_string()))?
            .iter()
            .map(|t| serde_json::from_value(t.clone()))
            .collect::<Result<Vec<ToolDefinition>, _>>()
            .map_err(|e| McpError::SerializationError(format!("Failed to parse tools: {e}")))?;
        Ok(tools)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools discovered at open time.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Call a tool by its raw name.
    ///
    /// A tool-level failure arrives as an in-band result and leaves the
    /// session `Ready`. A transport fault demotes the session to
    /// `Failed` and surfaces as `Err`; deadline expiry surfaces as an
    /// in-band timeout result.
    pub async fn call(
        &self,
        raw_name: &str,
        arguments: Value,
        deadline: Option<Duration>,
    ) -> Result<ToolResult, McpError> {
        let timeout = deadline.unwrap_or(self.call_timeout);

        let outcome = tokio::time::timeout(
            timeout,
            self.transport.request(
                "tools/call",
                json!({ "name": raw_name, "arguments": arguments }),
            ),
        )
        .await;

        match outcome {
            Err(_) => {
                // Cancellation of the in-flight request is best-effort;
                // the reply, if it ever arrives, is dropped.
                Ok(ToolResult::error(format!(
                    "timeout: {raw_name} did not reply within {} ms",
                    timeout.as_millis()
                )))
            }
            Ok(Ok(result)) => serde_json::from_value(result)
                .map_err(|e| McpError::SerializationError(format!("Failed to parse result: {e}"))),
            Ok(Err(McpError::CallFailed(reason))) => {
                // The backend answered with a protocol-level error; report
                // it in-band so the caller can reason about it.
                Ok(ToolResult::error(reason))
            }
            Ok(Err(e)) => {
                warn!(backend = %self.name, error = %e, "transport fault, session failed");
                *self.state.write().await = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Best-effort release of the transport and any child process.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}
