//! # toolgate-oauth
//!
//! File-backed OAuth credential broker for remote backends.
//!
//! Connectors hand control here when a remote backend rejects the first
//! connection. The broker runs the code grant with PKCE (registering a
//! client dynamically if needed), receives the redirect on a loopback
//! listener, and persists the three credential blobs per backend under
//! its storage directory:
//!
//! ```text
//! <root>/.oauth/<backend>/
//!   ├── client_info.json     dynamic-registration result
//!   ├── tokens.json          access + refresh tokens, expiry metadata
//!   └── code_verifier.txt    PKCE secret (written before redirect,
//!                            consumed exactly once on callback)
//! ```
//!
//! The broker owns the directory exclusively; each write is an atomic
//! replace.

mod broker;
mod error;
mod listener;
pub mod pkce;
mod store;

pub use broker::{
    AuthServerMetadata, OAuthBroker, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_REDIRECT_PORT,
};
pub use error::OAuthError;
pub use listener::CallbackOutcome;
pub use store::{ClientInfo, InvalidateScope, OAuthStore, TokenSet};
