//! Federation proxy.
//!
//! Aggregates every configured backend behind one catalog of qualified
//! tool names and routes calls to the owning session. The proxy itself
//! speaks the same envelope as the backends, so hosted clients (the
//! sandbox process in particular) treat it as just another backend.

pub mod catalog;
pub mod service;

pub use catalog::{qualify, split_qualified, Catalog, CatalogEntry};
pub use service::{handle_request, http_router, serve_http, serve_stdio, ToolService};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::client::{
    validate_backend_name, BackendSession, CredentialProvider, McpConfig, SessionState,
};
use crate::types::{ToolDefinition, ToolResult};
use crate::McpError;

/// The aggregating proxy: sessions plus the shared catalog.
pub struct ToolProxy {
    sessions: RwLock<HashMap<String, Arc<BackendSession>>>,
    catalog: Catalog,
}

impl Default for ToolProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolProxy {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            catalog: Catalog::new(),
        }
    }

    /// Connect every configured backend concurrently.
    ///
    /// An unreachable backend is logged and skipped; its tools are simply
    /// absent from the catalog and the other backends continue.
    #[instrument(skip_all)]
    pub async fn connect_all(
        &self,
        config: &McpConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) {
        let opens = config.servers.iter().map(|(name, backend)| {
            let credentials = credentials.clone();
            async move {
                (
                    name.clone(),
                    BackendSession::open(name, backend, credentials).await,
                )
            }
        });

        for (name, outcome) in futures::future::join_all(opens).await {
            match outcome {
                Ok(session) => {
                    self.install(session).await;
                    info!(backend = %name, "connected");
                }
                Err(e) => warn!(backend = %name, error = %e, "failed to connect, skipping"),
            }
        }
    }

    /// Add one backend session; the name is validated first.
    pub async fn add_backend(
        &self,
        name: &str,
        config: &crate::client::BackendConfig,
        credentials: Option<Arc<dyn CredentialProvider>>,
    ) -> Result<(), McpError> {
        validate_backend_name(name)?;
        let session = BackendSession::open(name, config, credentials).await?;
        self.install(session).await;
        Ok(())
    }

    async fn install(&self, session: BackendSession) {
        let name = session.name().to_string();
        self.catalog.insert_backend(&name, session.tools()).await;
        self.sessions
            .write()
            .await
            .insert(name, Arc::new(session));
    }

    /// Drop a failed backend: close its session and evict its tools.
    pub async fn evict_backend(&self, name: &str) {
        if let Some(session) = self.sessions.write().await.remove(name) {
            session.close().await;
        }
        self.catalog.evict_backend(name).await;
        warn!(backend = name, "backend evicted");
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Every catalog entry (qualified, description-decorated).
    pub async fn catalog_entries(&self) -> Vec<CatalogEntry> {
        self.catalog.entries().await
    }

    /// Call a qualified tool.
    ///
    /// Missing backends and tools come back as in-band error results so
    /// the calling model can reason about them; only programmer errors
    /// (never wire conditions) surface as `Err`. The proxy does not
    /// retry failed calls.
    pub async fn call_tool(
        &self,
        qualified: &str,
        arguments: Value,
        deadline: Option<Duration>,
    ) -> ToolResult {
        let Some((backend, raw_name)) = split_qualified(qualified) else {
            return ToolResult::error(format!(
                "Tool not found: {qualified} (expected backend__tool)"
            ));
        };

        let session = self.sessions.read().await.get(backend).cloned();
        let Some(session) = session else {
            return ToolResult::error(format!("Backend unavailable: {backend}"));
        };

        if !self.catalog.contains(qualified).await {
            return ToolResult::error(format!("Tool not found: {qualified}"));
        }

        match session.call(raw_name, arguments, deadline).await {
            Ok(result) => result,
            Err(e) => {
                // The transport faulted; the session is already demoted.
                if session.state().await == SessionState::Failed {
                    self.evict_backend(backend).await;
                }
                ToolResult::error(format!("Backend unavailable: {backend}: {e}"))
            }
        }
    }

    /// Close every session; best-effort.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            session.close().await;
        }
    }
}

#[async_trait]
impl ToolService for ToolProxy {
    async fn service_tools(&self) -> Vec<ToolDefinition> {
        self.catalog
            .entries()
            .await
            .into_iter()
            .map(|entry| entry.definition())
            .collect()
    }

    async fn service_call(
        &self,
        name: &str,
        arguments: Value,
        deadline: Option<Duration>,
    ) -> ToolResult {
        self.call_tool(name, arguments, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_proxy_has_empty_catalog() {
        let proxy = ToolProxy::new();
        assert!(proxy.catalog().is_empty().await);
        assert!(proxy.service_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_call_unknown_backend_is_in_band_error() {
        let proxy = ToolProxy::new();
        let result = proxy
            .call_tool("ghost__tool", serde_json::json!({}), None)
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_call_unqualified_name_is_in_band_error() {
        let proxy = ToolProxy::new();
        let result = proxy.call_tool("plain", serde_json::json!({}), None).await;
        assert!(result.is_error);
    }
}
