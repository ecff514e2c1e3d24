//! # toolgate-mcp
//!
//! Tool-protocol plumbing for the toolgate hub: backend connectors and
//! the federation proxy.
//!
//! A hub run connects to N heterogeneous backends (local subprocesses
//! over line-delimited stdio, remote servers over SSE or streamable
//! HTTP), namespaces every discovered tool as `backend__tool`, and
//! routes calls through one catalog:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ToolProxy                             │
//! │                                                             │
//! │   catalog: bash__read_file, bash__list_directory,           │
//! │            docs__search, events__subscribe, ...             │
//! │                                                             │
//! │   tools/list ─▶ decorated definitions                       │
//! │   tools/call ─▶ split on first "__" ─▶ owning session       │
//! └───────────────┬─────────────────┬───────────────────────────┘
//!                 │                 │
//!          stdio session      http/sse session
//! ```
//!
//! The proxy itself is served over the same envelope (stdio lines or
//! `POST /mcp`), so hosted clients treat it as one more backend.

pub mod client;
mod error;
pub mod proxy;
pub mod types;

pub use client::{
    validate_backend_name, BackendConfig, BackendSession, CredentialProvider, McpConfig,
    RemoteTransport, SessionState, Transport, TransportKind, NAME_SEPARATOR,
};
pub use error::McpError;
pub use proxy::{
    handle_request, http_router, qualify, serve_http, serve_stdio, split_qualified, Catalog,
    CatalogEntry, ToolProxy, ToolService,
};
pub use types::{ContentItem, JsonRpcRequest, JsonRpcResponse, ToolDefinition, ToolResult};
