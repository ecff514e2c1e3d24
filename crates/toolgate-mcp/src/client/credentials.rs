//! Credential seam between connectors and the authorization broker.

use async_trait::async_trait;

use crate::McpError;

/// Supplies bearer credentials for remote backends.
///
/// Connectors consult the provider when a remote backend rejects the
/// first connection; the broker crate implements it on top of its
/// file-backed storage and loopback redirect listener.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A previously obtained (or refreshed) access token, if any.
    async fn access_token(&self, backend: &str) -> Option<String>;

    /// Run the full authorization flow for the backend and return a fresh
    /// access token. Blocks until the operator completes the redirect or
    /// the flow times out.
    async fn authorize(&self, backend: &str, server_url: &str) -> Result<String, McpError>;
}
