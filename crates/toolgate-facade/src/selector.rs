//! LLM-assisted relevance filter.
//!
//! `search_tools` delegates candidate selection to a [`Selector`]. The
//! default implementation prompts a small model for a JSON array of
//! qualified names; the façade intersects whatever comes back with the
//! candidate set, and falls back to the full candidate list whenever the
//! selector is unavailable or returns something unparsable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use toolgate_mcp::CatalogEntry;

use crate::FacadeError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_SELECTOR_MODEL: &str = "claude-3-5-haiku-latest";

/// Picks the relevant subset of a tool catalog for a query.
#[async_trait]
pub trait Selector: Send + Sync {
    /// Qualified names judged relevant. Names outside the candidate set
    /// are permitted here; the façade intersects before answering.
    async fn select(
        &self,
        query: &str,
        candidates: &[CatalogEntry],
    ) -> Result<Vec<String>, FacadeError>;
}

/// Deterministic fallback: every candidate is relevant.
pub struct KeepAllSelector;

#[async_trait]
impl Selector for KeepAllSelector {
    async fn select(
        &self,
        _query: &str,
        candidates: &[CatalogEntry],
    ) -> Result<Vec<String>, FacadeError> {
        Ok(candidates
            .iter()
            .map(|entry| entry.qualified_name.clone())
            .collect())
    }
}

#[derive(Serialize)]
struct SelectorRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<SelectorMessage>,
}

#[derive(Serialize)]
struct SelectorMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct SelectorResponse {
    content: Vec<SelectorContent>,
}

#[derive(Deserialize)]
struct SelectorContent {
    #[serde(default)]
    text: String,
}

/// Anthropic-backed selector.
pub struct LlmSelector {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmSelector {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 1024,
        }
    }

    /// Build from the environment; `None` when no API key is configured,
    /// in which case callers should fall back to [`KeepAllSelector`].
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        let model = std::env::var("TOOLGATE_SELECTOR_MODEL")
            .unwrap_or_else(|_| DEFAULT_SELECTOR_MODEL.to_string());
        Some(Self::new(api_key, model))
    }

    fn prompt(query: &str, candidates: &[CatalogEntry]) -> String {
        let mut lines = String::new();
        for entry in candidates {
            lines.push_str(&format!("- {}: {}\n", entry.qualified_name, entry.description));
        }
        format!(
            "Query: {query}\n\nAvailable tools:\n{lines}\nReturn the JSON array of relevant tool names."
        )
    }
}

#[async_trait]
impl Selector for LlmSelector {
    async fn select(
        &self,
        query: &str,
        candidates: &[CatalogEntry],
    ) -> Result<Vec<String>, FacadeError> {
        let request = SelectorRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: "You select tools relevant to a user query from a catalog. \
                     Reply with ONLY a JSON array of tool name strings, nothing else."
                .to_string(),
            messages: vec![SelectorMessage {
                role: "user".to_string(),
                content: Self::prompt(query, candidates),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| FacadeError::SelectorFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FacadeError::SelectorFailed(format!(
                "HTTP {} from selector model",
                response.status()
            )));
        }

        let body: SelectorResponse = response
            .json()
            .await
            .map_err(|e| FacadeError::SelectorFailed(e.to_string()))?;

        let text = body
            .content
            .first()
            .map(|c| c.text.as_str())
            .unwrap_or_default();

        let names = parse_name_array(text).ok_or_else(|| {
            FacadeError::SelectorFailed(format!("unparsable selector reply: {text:.80}"))
        })?;

        debug!(count = names.len(), "selector picked tools");
        Ok(names)
    }
}

/// Extract a JSON array of strings from a possibly chatty model reply.
fn parse_name_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&text[start..=end]).ok()
}
