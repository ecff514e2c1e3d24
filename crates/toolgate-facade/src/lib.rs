//! # toolgate-facade
//!
//! The meta-tool façade: reduces a catalog of potentially hundreds of
//! backend tools to four surfaced operations, so the protocol surface
//! the chat loop sees stays small and constant regardless of how many
//! backends are federated.
//!
//! ```text
//! chat loop ──▶ list_tool_names ─┐
//!           ──▶ search_tools    ─┼──▶ catalog (read-only)
//!           ──▶ get_tool_definition ┘
//!           ──▶ execute_script ────▶ sandbox manager ──▶ container
//! ```
//!
//! `search_tools` runs an LLM-assisted relevance filter behind the
//! pluggable [`Selector`] seam; a selector failure degrades to the full
//! candidate list, never to an error.

mod meta;
mod selector;

pub use meta::{
    MetaTools, OP_EXECUTE_SCRIPT, OP_GET_TOOL_DEFINITION, OP_LIST_TOOL_NAMES, OP_SEARCH_TOOLS,
};
pub use selector::{KeepAllSelector, LlmSelector, Selector};

use thiserror::Error;

/// Façade-level errors. These stay inside the crate boundary: every
/// caller-visible failure is reported as an in-band error result.
#[derive(Error, Debug)]
pub enum FacadeError {
    /// Malformed operation parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The relevance selector could not produce a usable answer
    #[error("Selector failed: {0}")]
    SelectorFailed(String),
}
