//! Backend configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::McpError;

/// Separator between a backend name and a raw tool name in qualified names.
///
/// Backend names must not contain it; raw tool names may.
pub const NAME_SEPARATOR: &str = "__";

/// Transport for a remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteTransport {
    /// Server-sent-event stream (GET establishes the stream, requests are POSTed)
    Sse,
    /// Streamable HTTP framing (one POST per request, response may be an event stream)
    StreamableHttp,
}

/// How a backend is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

/// Configuration for a single backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Server URL (remote backends)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Remote transport; defaults to streamable HTTP when only `url` is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<RemoteTransport>,

    /// Extra HTTP headers (for authentication)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Command to run (local backends)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables for the subprocess
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_timeout() -> u64 {
    30000
}

impl BackendConfig {
    /// Determine the transport kind from the config.
    pub fn transport_kind(&self) -> TransportKind {
        if self.url.is_some() {
            match self.transport {
                Some(RemoteTransport::Sse) => TransportKind::Sse,
                _ => TransportKind::StreamableHttp,
            }
        } else {
            TransportKind::Stdio
        }
    }

    /// Create a remote backend config (streamable HTTP).
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            transport: Some(RemoteTransport::StreamableHttp),
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            timeout_ms: default_timeout(),
        }
    }

    /// Create a remote backend config with the SSE transport.
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            transport: Some(RemoteTransport::Sse),
            ..Self::http(url)
        }
    }

    /// Create a local subprocess backend config.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            url: None,
            transport: None,
            headers: HashMap::new(),
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            timeout_ms: default_timeout(),
        }
    }

    /// Add an HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Root configuration holding all backends, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Map of backend name to configuration
    #[serde(rename = "mcpServers")]
    pub servers: HashMap<String, BackendConfig>,
}

impl McpConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON string and validate backend names.
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| McpError::SerializationError(format!("Invalid config: {e}")))?;
        for name in config.servers.keys() {
            validate_backend_name(name)?;
        }
        Ok(config)
    }

    /// Add a backend; the name is validated.
    pub fn add_server(
        mut self,
        name: impl Into<String>,
        config: BackendConfig,
    ) -> Result<Self, McpError> {
        let name = name.into();
        validate_backend_name(&name)?;
        self.servers.insert(name, config);
        Ok(self)
    }

    /// Get a backend config by name.
    pub fn get(&self, name: &str) -> Option<&BackendConfig> {
        self.servers.get(name)
    }

    /// List all backend names.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(|s| s.as_str()).collect()
    }
}

/// Validate a backend name: non-empty and free of the name separator.
///
/// The separator restriction is what makes first-occurrence splitting of
/// qualified names unambiguous, so violating it is fatal at startup.
pub fn validate_backend_name(name: &str) -> Result<(), McpError> {
    if name.is_empty() {
        return Err(McpError::InvalidConfig(
            "backend name must not be empty".to_string(),
        ));
    }
    if name.contains(NAME_SEPARATOR) {
        return Err(McpError::InvalidConfig(format!(
            "backend name {name:?} must not contain {NAME_SEPARATOR:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_config() {
        let json = r#"{
            "mcpServers": {
                "docs": {
                    "url": "https://mcp.example.com/mcp",
                    "transport": "streamable-http",
                    "headers": { "X-Api-Key": "test-key" }
                }
            }
        }"#;

        let config = McpConfig::from_json(json).unwrap();
        let server = config.get("docs").unwrap();

        assert_eq!(server.url.as_deref(), Some("https://mcp.example.com/mcp"));
        assert_eq!(server.transport_kind(), TransportKind::StreamableHttp);
        assert_eq!(server.headers.get("X-Api-Key"), Some(&"test-key".to_string()));
    }

    #[test]
    fn test_parse_sse_config() {
        let json = r#"{
            "mcpServers": {
                "events": { "url": "https://mcp.example.com/sse", "transport": "sse" }
            }
        }"#;

        let config = McpConfig::from_json(json).unwrap();
        assert_eq!(
            config.get("events").unwrap().transport_kind(),
            TransportKind::Sse
        );
    }

    #[test]
    fn test_parse_stdio_config() {
        let json = r#"{
            "mcpServers": {
                "bash": {
                    "command": "npx",
                    "args": ["-y", "some-tool-server"],
                    "env": { "HOME": "/tmp" }
                }
            }
        }"#;

        let config = McpConfig::from_json(json).unwrap();
        let server = config.get("bash").unwrap();

        assert_eq!(server.command.as_deref(), Some("npx"));
        assert_eq!(server.transport_kind(), TransportKind::Stdio);
    }

    #[test]
    fn test_illegal_name_rejected() {
        let json = r#"{
            "mcpServers": {
                "has__double": { "command": "true" }
            }
        }"#;

        assert!(matches!(
            McpConfig::from_json(json),
            Err(McpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = McpConfig::new()
            .add_server("docs", BackendConfig::http("https://mcp.example.com/mcp"))
            .unwrap()
            .add_server("bash", BackendConfig::stdio("bash-tools", vec![]))
            .unwrap();

        assert_eq!(config.server_names().len(), 2);
    }
}
