//! Hub configuration.
//!
//! One file holds everything: the workspace root plus the list of
//! backend descriptors. Descriptor validation happens at load time and
//! is fatal: an illegal backend name never reaches the proxy.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use toolgate_mcp::{validate_backend_name, BackendConfig, McpConfig};

/// Configuration errors; all fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Malformed(String),

    #[error("Invalid backend descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Duplicate backend name: {0}")]
    DuplicateName(String),
}

/// One backend descriptor: a name plus its transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Workspace root, bind-mounted into the sandbox
    pub workspace: PathBuf,
    /// Skills directory; defaults to `<workspace>/skills`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<PathBuf>,
}

/// Listening ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    /// In-sandbox proxy port
    #[serde(default = "default_proxy_port")]
    pub proxy: u16,
    /// OAuth loopback redirect port
    #[serde(default = "default_redirect_port")]
    pub redirect: u16,
    /// Optional HTTP interface on the host; stdio is always served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<u16>,
}

fn default_proxy_port() -> u16 {
    8700
}

fn default_redirect_port() -> u16 {
    3000
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            proxy: default_proxy_port(),
            redirect: default_redirect_port(),
            http: None,
        }
    }
}

/// The root configuration value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    pub paths: PathsConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    /// Sandbox image tag
    #[serde(default = "default_image")]
    pub sandbox_image: String,
}

fn default_image() -> String {
    "toolgate-sandbox:latest".to_string()
}

impl HubConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.servers {
            validate_backend_name(&entry.name)
                .map_err(|e| ConfigError::InvalidDescriptor(e.to_string()))?;
            if entry.backend.command.is_none() && entry.backend.url.is_none() {
                return Err(ConfigError::InvalidDescriptor(format!(
                    "backend {} has neither command nor url",
                    entry.name
                )));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateName(entry.name.clone()));
            }
        }
        Ok(())
    }

    /// The backend map the federation proxy consumes.
    pub fn mcp_config(&self) -> McpConfig {
        let mut config = McpConfig::new();
        for entry in &self.servers {
            // Names were validated at load time.
            config.servers.insert(entry.name.clone(), entry.backend.clone());
        }
        config
    }

    /// The same config rewritten for the in-container proxy instance,
    /// whose view of the workspace root is the mount point.
    pub fn for_container(&self, mount_point: &str) -> Self {
        let mut inside = self.clone();
        inside.paths.workspace = PathBuf::from(mount_point);
        inside.paths.skills = None;
        inside.ports.http = Some(self.ports.proxy);
        inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_server_list() {
        let config = HubConfig::from_json(
            r#"{"servers": [], "paths": {"workspace": "/w", "skills": "/w/skills"}}"#,
        )
        .unwrap();

        assert!(config.servers.is_empty());
        assert_eq!(config.paths.workspace, PathBuf::from("/w"));
        assert_eq!(config.ports.proxy, 8700);
        assert_eq!(config.ports.redirect, 3000);
    }

    #[test]
    fn test_descriptor_shapes() {
        let config = HubConfig::from_json(
            r#"{
                "servers": [
                    {"name": "bash", "command": "bash-tools", "args": ["--stdio"]},
                    {"name": "docs", "url": "https://mcp.example.com/mcp", "transport": "streamable-http"},
                    {"name": "events", "url": "https://mcp.example.com/sse", "transport": "sse"}
                ],
                "paths": {"workspace": "/w"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 3);
        let mcp = config.mcp_config();
        assert!(mcp.get("bash").unwrap().command.is_some());
        assert!(mcp.get("events").unwrap().url.is_some());
    }

    #[test]
    fn test_illegal_name_is_fatal() {
        let outcome = HubConfig::from_json(
            r#"{
                "servers": [{"name": "has__double", "command": "true"}],
                "paths": {"workspace": "/w"}
            }"#,
        );
        assert!(matches!(outcome, Err(ConfigError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let outcome = HubConfig::from_json(
            r#"{
                "servers": [
                    {"name": "a", "command": "x"},
                    {"name": "a", "command": "y"}
                ],
                "paths": {"workspace": "/w"}
            }"#,
        );
        assert!(matches!(outcome, Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_descriptor_without_transport_is_fatal() {
        let outcome = HubConfig::from_json(
            r#"{
                "servers": [{"name": "ghost"}],
                "paths": {"workspace": "/w"}
            }"#,
        );
        assert!(matches!(outcome, Err(ConfigError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_for_container_rewrites_paths() {
        let config = HubConfig::from_json(
            r#"{"servers": [], "paths": {"workspace": "/home/op/hub"}}"#,
        )
        .unwrap();

        let inside = config.for_container("/workspace");
        assert_eq!(inside.paths.workspace, PathBuf::from("/workspace"));
        assert_eq!(inside.ports.http, Some(8700));
    }
}
