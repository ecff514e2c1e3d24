//! Backend connectors.
//!
//! One session per configured backend, over one of three transports:
//!
//! ```text
//!          ┌──────────────────────────────┐
//!          │         ToolProxy            │
//!          │   (catalog + dispatch)       │
//!          └──────────────┬───────────────┘
//!                         │
//!     ┌───────────────────┼───────────────────┐
//!     ▼                   ▼                   ▼
//! ┌──────────┐     ┌─────────────┐     ┌─────────────┐
//! │  bash    │     │   docs      │     │   events    │
//! │ (stdio)  │     │ (http)      │     │   (sse)     │
//! └──────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! Remote backends that reject the first connection with 401 are routed
//! through the [`CredentialProvider`] and retried exactly once.

pub mod config;
pub mod credentials;
pub mod session;
pub mod transport;

pub use config::{
    validate_backend_name, BackendConfig, McpConfig, RemoteTransport, TransportKind,
    NAME_SEPARATOR,
};
pub use credentials::CredentialProvider;
pub use session::{BackendSession, SessionState};
pub use transport::Transport;
