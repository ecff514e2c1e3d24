//! Client transports.
//!
//! Three ways to reach a backend, all speaking the same JSON-RPC envelope:
//!
//! - **stdio**: a local subprocess with line-delimited messages on
//!   stdin/stdout; stderr is inherited for diagnostics.
//! - **streamable HTTP**: one POST per request; the server may answer
//!   with plain JSON or with a short event stream carrying the reply.
//! - **SSE**: a long-lived GET event stream; the server's `endpoint`
//!   event names the POST target, replies arrive on the stream and are
//!   correlated by request id.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{JsonRpcRequest, JsonRpcResponse};
use crate::McpError;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// A bidirectional request/response channel to one backend.
///
/// Within one transport, requests are delivered in submission order and
/// replies are matched by request id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and await its reply, returning the `result` value.
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;

    /// Best-effort release of the underlying channel.
    async fn close(&self);
}

fn unwrap_response(response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(error) = response.error {
        return Err(McpError::CallFailed(format!(
            "{} (code {})",
            error.message, error.code
        )));
    }
    response
        .result
        .ok_or_else(|| McpError::SerializationError("response carried no result".to_string()))
}

fn response_id(response: &JsonRpcResponse) -> Option<u64> {
    response.id.as_u64()
}

fn is_reply(response: &JsonRpcResponse) -> bool {
    response.result.is_some() || response.error.is_some()
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

/// Transport over a spawned subprocess with line-delimited JSON messages.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the backend subprocess and wire its pipes.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::ConnectionFailed(format!("spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ConnectionFailed("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ConnectionFailed("child stdout unavailable".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(line) {
                            // Server-initiated requests and notifications
                            // also parse into this shape; only genuine
                            // replies carry a result or error.
                            Ok(response) if is_reply(&response) => {
                                if let Some(id) = response_id(&response) {
                                    if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                        let _ = tx.send(response);
                                    }
                                }
                            }
                            Ok(_) => debug!("ignoring non-reply message from backend"),
                            Err(e) => debug!("unparsable line from backend: {e}"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("backend stdout read failed: {e}");
                        break;
                    }
                }
            }
            // Dropping the senders wakes every waiter with a channel error.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut line = serde_json::to_string(&request)
            .map_err(|e| McpError::SerializationError(e.to_string()))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                return Err(McpError::TransportError(format!("stdin write: {e}")));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.lock().await.remove(&id);
                return Err(McpError::TransportError(format!("stdin flush: {e}")));
            }
        }

        let response = rx
            .await
            .map_err(|_| McpError::TransportError("backend closed the stream".to_string()))?;
        unwrap_response(response)
    }

    async fn close(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}

// ---------------------------------------------------------------------------
// SSE event parsing (shared by the two HTTP transports)
// ---------------------------------------------------------------------------

/// One server-sent event.
#[derive(Debug, Clone, Default)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental parser for a `text/event-stream` body.
#[derive(Default)]
pub(crate) struct SseParser {
    buf: String,
    current: SseEvent,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.current.data.is_empty() || !self.current.event.is_empty() {
                    out.push(std::mem::take(&mut self.current));
                }
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.current.event = rest.trim_start().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(rest.trim_start());
            }
            // comment lines (":") and unknown fields are skipped
        }

        out
    }
}

fn build_header_map(
    headers: &HashMap<String, String>,
    bearer: Option<&str>,
) -> Result<reqwest::header::HeaderMap, McpError> {
    let mut map = reqwest::header::HeaderMap::new();

    // Backends answer either plain JSON or an event stream; accept both.
    map.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json, text/event-stream"),
    );

    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| McpError::ConnectionFailed(format!("Invalid header name: {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| McpError::ConnectionFailed(format!("Invalid header value: {e}")))?;
        map.insert(name, value);
    }

    if let Some(token) = bearer {
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| McpError::ConnectionFailed(format!("Invalid auth value: {e}")))?;
        map.insert(reqwest::header::AUTHORIZATION, value);
    }

    Ok(map)
}

/// Scheme and authority of a URL, for resolving relative endpoints.
fn origin_of(url: &str) -> &str {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        match rest.find('/') {
            Some(path_start) => &url[..scheme_end + 3 + path_start],
            None => url,
        }
    } else {
        url
    }
}

// ---------------------------------------------------------------------------
// streamable HTTP
// ---------------------------------------------------------------------------

/// Transport that issues one POST per request.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl StreamableHttpTransport {
    pub fn connect(
        url: impl Into<String>,
        headers: &HashMap<String, String>,
        bearer: Option<&str>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .default_headers(build_header_map(headers, bearer)?)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| McpError::ConnectionFailed(format!("Failed to create client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Pull the JSON-RPC reply with the given id out of an event stream body.
    async fn read_stream_response(
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| McpError::TransportError(format!("stream read: {e}")))?;
            let text = String::from_utf8_lossy(&chunk);
            for event in parser.feed(&text) {
                if event.data.is_empty() {
                    continue;
                }
                if let Ok(reply) = serde_json::from_str::<JsonRpcResponse>(&event.data) {
                    if is_reply(&reply) && response_id(&reply) == Some(id) {
                        return Ok(reply);
                    }
                }
            }
        }

        Err(McpError::TransportError(
            "event stream ended without a reply".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else {
                    McpError::TransportError(format!("HTTP request failed: {e}"))
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(McpError::Unauthorized(self.url.clone()));
        }
        if !response.status().is_success() {
            return Err(McpError::TransportError(format!(
                "HTTP {} from backend",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let reply = if content_type.starts_with("text/event-stream") {
            Self::read_stream_response(response, id).await?
        } else {
            response
                .json::<JsonRpcResponse>()
                .await
                .map_err(|e| McpError::SerializationError(format!("Invalid response: {e}")))?
        };

        unwrap_response(reply)
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// Transport over a long-lived event stream plus a POST endpoint.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    pending: PendingMap,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// POST endpoint.
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        bearer: Option<&str>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .default_headers(build_header_map(headers, bearer)?)
            .build()
            .map_err(|e| McpError::ConnectionFailed(format!("Failed to create client: {e}")))?;

        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::ConnectionFailed(format!("SSE connect: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(McpError::Unauthorized(url.to_string()));
        }
        if !response.status().is_success() {
            return Err(McpError::ConnectionFailed(format!(
                "HTTP {} opening event stream",
                response.status()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let origin = origin_of(url).to_string();
        let reader_pending = pending.clone();

        let reader = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();
            let mut endpoint_tx = Some(endpoint_tx);

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("event stream read failed: {e}");
                        break;
                    }
                };
                let text = String::from_utf8_lossy(&chunk);
                for event in parser.feed(&text) {
                    if event.event == "endpoint" {
                        let endpoint = if event.data.starts_with("http") {
                            event.data.clone()
                        } else {
                            format!("{origin}{}", event.data)
                        };
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(endpoint);
                        }
                    } else if !event.data.is_empty() {
                        if let Ok(reply) = serde_json::from_str::<JsonRpcResponse>(&event.data) {
                            if is_reply(&reply) {
                                if let Some(id) = response_id(&reply) {
                                    if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                        let _ = tx.send(reply);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            reader_pending.lock().await.clear();
        });

        let endpoint = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            endpoint_rx,
        )
        .await
        .map_err(|_| {
            McpError::HandshakeFailed("no endpoint event before timeout".to_string())
        })?
        .map_err(|_| McpError::HandshakeFailed("event stream closed early".to_string()))?;

        debug!(endpoint, "SSE endpoint established");

        Ok(Self {
            client,
            endpoint,
            pending,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| McpError::TransportError(format!("HTTP request failed: {e}")));

        match response {
            Ok(r) if r.status() == reqwest::StatusCode::UNAUTHORIZED => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Unauthorized(self.endpoint.clone()));
            }
            Ok(r) if !r.status().is_success() => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::TransportError(format!(
                    "HTTP {} posting request",
                    r.status()
                )));
            }
            Ok(_) => {}
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        let reply = rx
            .await
            .map_err(|_| McpError::TransportError("event stream closed".to_string()))?;
        unwrap_response(reply)
    }

    async fn close(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_single_event() {
        let mut parser = SseParser::default();
        let events = parser.feed("event: endpoint\ndata: /messages?id=1\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?id=1");
    }

    #[test]
    fn test_sse_parser_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed("data: {\"jsonrpc\"").is_empty());
        let events = parser.feed(":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn test_sse_parser_multiline_data() {
        let mut parser = SseParser::default();
        let events = parser.feed("data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://mcp.example.com/sse/stream"),
            "https://mcp.example.com"
        );
        assert_eq!(origin_of("http://127.0.0.1:8700"), "http://127.0.0.1:8700");
    }

    #[test]
    fn test_unwrap_response_error() {
        let response = JsonRpcResponse::failure(serde_json::json!(1), -32000, "boom");
        assert!(matches!(
            unwrap_response(response),
            Err(McpError::CallFailed(_))
        ));
    }
}
