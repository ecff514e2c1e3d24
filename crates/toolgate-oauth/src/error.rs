//! Broker error types.

use thiserror::Error;

/// Errors that can occur during the authorization flow.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Dynamic client registration failed
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// Authorization-server metadata could not be fetched or parsed
    #[error("Metadata discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Code-for-token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Token refresh failed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The loopback redirect listener could not be started
    #[error("Listener failed: {0}")]
    ListenerFailed(String),

    /// The authorization server redirected with an error
    #[error("Authorization rejected: {0}")]
    AuthorizationRejected(String),

    /// The callback was malformed
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// No callback arrived before the deadline
    #[error("Timed out waiting for the authorization callback")]
    CallbackTimeout,

    /// No authorization flow is in flight for the backend
    #[error("No pending authorization for backend: {0}")]
    NoPendingFlow(String),

    /// The PKCE verifier is missing (already consumed or never staged)
    #[error("Missing code verifier for backend: {0}")]
    MissingVerifier(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}
