//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while talking to backends or routing calls.
#[derive(Error, Debug)]
pub enum McpError {
    /// Backend descriptor is malformed (bad name, missing url/command)
    #[error("Invalid backend config: {0}")]
    InvalidConfig(String),

    /// Transport-level fault after a session was established
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Could not reach the backend at all
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Backend reached but the protocol handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Remote backend rejected the connection with 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No session for the named backend
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Backend has no tool with that name
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool discovery failed
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Tool call failed
    #[error("Call failed: {0}")]
    CallFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Request deadline expired
    #[error("Request timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
