//! The four surfaced meta-operations.
//!
//! The chat loop never sees the federated catalog. It sees exactly four
//! tools (`list_tool_names`, `search_tools`, `get_tool_definition`,
//! `execute_script`) and discovers backend tools lazily through them.
//! Direct invocation of any other tool name is refused with an
//! instructive error: all real tool use goes through scripts and the
//! generated bindings, which keeps the protocol surface exposed to the
//! model small and constant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{instrument, warn};

use toolgate_mcp::{CatalogEntry, ToolDefinition, ToolProxy, ToolResult, ToolService};
use toolgate_sandbox::{SandboxManager, DEFAULT_SCRIPT_TIMEOUT_MS};

use crate::selector::Selector;

pub const OP_LIST_TOOL_NAMES: &str = "list_tool_names";
pub const OP_SEARCH_TOOLS: &str = "search_tools";
pub const OP_GET_TOOL_DEFINITION: &str = "get_tool_definition";
pub const OP_EXECUTE_SCRIPT: &str = "execute_script";

const DEFAULT_LIST_LIMIT: usize = 100;

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

fn default_script_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
struct ListToolNamesParams {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct GetToolDefinitionParams {
    tool_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchToolsParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ExecuteScriptParams {
    code: String,
    #[serde(default = "default_script_timeout")]
    timeout_ms: u64,
}

/// The meta-tool façade handed to the chat loop.
pub struct MetaTools {
    proxy: Arc<ToolProxy>,
    sandbox: Arc<SandboxManager>,
    selector: Box<dyn Selector>,
}

impl MetaTools {
    pub fn new(
        proxy: Arc<ToolProxy>,
        sandbox: Arc<SandboxManager>,
        selector: Box<dyn Selector>,
    ) -> Self {
        Self {
            proxy,
            sandbox,
            selector,
        }
    }

    /// The four tool schemas, the entire surface the chat loop sees.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: OP_LIST_TOOL_NAMES.to_string(),
                description: Some(
                    "List qualified tool names from the federated catalog, optionally \
                     filtered by server or keywords. Start here to discover what is available."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "server": {
                            "type": "string",
                            "description": "Restrict to one backend server"
                        },
                        "keywords": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Keep tools matching ANY keyword (name, description or schema)"
                        },
                        "limit": {
                            "type": "integer",
                            "default": DEFAULT_LIST_LIMIT,
                            "description": "Maximum number of names to return"
                        }
                    }
                }),
                output_schema: None,
            },
            ToolDefinition {
                name: OP_SEARCH_TOOLS.to_string(),
                description: Some(
                    "Find tools relevant to a natural-language query. Returns full tool \
                     definitions for the matching subset of the catalog."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What you are trying to do"
                        },
                        "server": {
                            "type": "string",
                            "description": "Restrict to one backend server"
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum number of tools to return"
                        }
                    }
                }),
                output_schema: None,
            },
            ToolDefinition {
                name: OP_GET_TOOL_DEFINITION.to_string(),
                description: Some(
                    "Fetch the full definition (description plus input/output schemas) of \
                     one qualified tool."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "tool_name": {
                            "type": "string",
                            "description": "Qualified name, e.g. bash__read_file"
                        }
                    },
                    "required": ["tool_name"]
                }),
                output_schema: None,
            },
            ToolDefinition {
                name: OP_EXECUTE_SCRIPT.to_string(),
                description: Some(
                    "Execute a TypeScript script inside the sandbox. Generated bindings for \
                     every catalog tool are in scope as `servers.<backend>.<tool>(...)`; \
                     results are whatever the script prints to stdout."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "The script to run"
                        },
                        "timeout_ms": {
                            "type": "integer",
                            "default": DEFAULT_SCRIPT_TIMEOUT_MS,
                            "description": "Wall-clock budget in milliseconds"
                        }
                    },
                    "required": ["code"]
                }),
                output_schema: None,
            },
        ]
    }

    fn parse<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolResult> {
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        serde_json::from_value(arguments)
            .map_err(|e| ToolResult::error(format!("Invalid parameters: {e}")))
    }

    /// Candidates after the optional server filter, sorted by name.
    async fn candidates(&self, server: Option<&str>) -> Vec<CatalogEntry> {
        let mut entries = self.proxy.catalog_entries().await;
        if let Some(server) = server {
            entries.retain(|entry| entry.backend == server);
        }
        entries.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        entries
    }

    #[instrument(skip(self, arguments))]
    async fn list_tool_names(&self, arguments: Value) -> ToolResult {
        let params: ListToolNamesParams = match Self::parse(arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut entries = self.candidates(params.server.as_deref()).await;

        // OR semantics: a tool stays when ANY keyword occurs in its
        // lowercased name, description or schema.
        if let Some(keywords) = &params.keywords {
            if !keywords.is_empty() {
                let keywords: Vec<String> =
                    keywords.iter().map(|k| k.to_lowercase()).collect();
                entries.retain(|entry| {
                    let haystack = format!(
                        "{} {} {}",
                        entry.qualified_name, entry.description, entry.input_schema
                    )
                    .to_lowercase();
                    keywords.iter().any(|k| haystack.contains(k))
                });
            }
        }

        let total = entries.len();
        let names: Vec<&str> = entries
            .iter()
            .take(params.limit)
            .map(|entry| entry.qualified_name.as_str())
            .collect();

        ToolResult::structured(json!({
            "tool_names": names,
            "total": total,
            "returned": names.len(),
            "truncated": total > params.limit,
        }))
    }

    async fn get_tool_definition(&self, arguments: Value) -> ToolResult {
        let params: GetToolDefinitionParams = match Self::parse(arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        match self.proxy.catalog().get(&params.tool_name).await {
            Some(entry) => ToolResult::structured(
                serde_json::to_value(entry.definition()).unwrap_or(Value::Null),
            ),
            None => ToolResult::error(format!("Tool not found: {}", params.tool_name)),
        }
    }

    #[instrument(skip(self, arguments))]
    async fn search_tools(&self, arguments: Value) -> ToolResult {
        let params: SearchToolsParams = match Self::parse(arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let candidates = self.candidates(params.server.as_deref()).await;

        let mut selected: Vec<&CatalogEntry> = match params.query.as_deref() {
            Some(query) if !query.trim().is_empty() => {
                match self.selector.select(query, &candidates).await {
                    Ok(names) => {
                        // Whatever the selector invents, the answer stays
                        // a subset of the candidate set.
                        candidates
                            .iter()
                            .filter(|entry| names.contains(&entry.qualified_name))
                            .collect()
                    }
                    Err(e) => {
                        warn!(error = %e, "selector failed, returning all candidates");
                        candidates.iter().collect()
                    }
                }
            }
            _ => candidates.iter().collect(),
        };

        if let Some(limit) = params.limit {
            selected.truncate(limit);
        }

        let tools: Vec<ToolDefinition> =
            selected.into_iter().map(|entry| entry.definition()).collect();

        ToolResult::structured(json!({
            "tools": tools,
            "returned": tools.len(),
        }))
    }

    async fn execute_script(&self, arguments: Value) -> ToolResult {
        let params: ExecuteScriptParams = match Self::parse(arguments) {
            Ok(p) => p,
            Err(e) => return e,
        };

        match self
            .sandbox
            .execute_script(&params.code, params.timeout_ms)
            .await
        {
            Ok(execution) => ToolResult::structured(
                serde_json::to_value(&execution).unwrap_or(Value::Null),
            ),
            Err(e) => ToolResult::error(format!("Script execution failed: {e}")),
        }
    }
}

#[async_trait]
impl ToolService for MetaTools {
    async fn service_tools(&self) -> Vec<ToolDefinition> {
        Self::definitions()
    }

    async fn service_call(
        &self,
        name: &str,
        arguments: Value,
        _deadline: Option<Duration>,
    ) -> ToolResult {
        match name {
            OP_LIST_TOOL_NAMES => self.list_tool_names(arguments).await,
            OP_SEARCH_TOOLS => self.search_tools(arguments).await,
            OP_GET_TOOL_DEFINITION => self.get_tool_definition(arguments).await,
            OP_EXECUTE_SCRIPT => self.execute_script(arguments).await,
            other => ToolResult::error(format!(
                "Unknown tool: {other}. Backend tools cannot be invoked directly; \
                 write a script that calls the generated bindings and run it with \
                 {OP_EXECUTE_SCRIPT}."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::KeepAllSelector;
    use toolgate_mcp::types::ContentItem;
    use toolgate_sandbox::SandboxConfig;

    struct FixedSelector(Vec<String>);

    #[async_trait]
    impl Selector for FixedSelector {
        async fn select(
            &self,
            _query: &str,
            _candidates: &[CatalogEntry],
        ) -> Result<Vec<String>, crate::FacadeError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSelector;

    #[async_trait]
    impl Selector for BrokenSelector {
        async fn select(
            &self,
            _query: &str,
            _candidates: &[CatalogEntry],
        ) -> Result<Vec<String>, crate::FacadeError> {
            Err(crate::FacadeError::SelectorFailed("offline".to_string()))
        }
    }

    fn tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: json!({"type": "object"}),
            output_schema: None,
        }
    }

    async fn facade_with(
        selector: Box<dyn Selector>,
        backends: &[(&str, Vec<ToolDefinition>)],
    ) -> (MetaTools, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let proxy = Arc::new(ToolProxy::new());
        for (backend, tools) in backends {
            proxy.catalog().insert_backend(backend, tools).await;
        }
        let sandbox = Arc::new(SandboxManager::new(SandboxConfig {
            workspace_root: dir.path().to_path_buf(),
            ..Default::default()
        }));
        (MetaTools::new(proxy, sandbox, selector), dir)
    }

    fn structured(result: &ToolResult) -> &Value {
        result.structured_content.as_ref().unwrap()
    }

    #[tokio::test]
    async fn test_exactly_four_operations() {
        let names: Vec<String> = MetaTools::definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "list_tool_names",
                "search_tools",
                "get_tool_definition",
                "execute_script"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_list() {
        let (facade, _dir) = facade_with(Box::new(KeepAllSelector), &[]).await;
        let result = facade.service_call(OP_LIST_TOOL_NAMES, json!({}), None).await;

        assert!(!result.is_error);
        let body = structured(&result);
        assert_eq!(body["tool_names"], json!([]));
        assert_eq!(body["total"], 0);
        assert_eq!(body["returned"], 0);
        assert_eq!(body["truncated"], false);
    }

    #[tokio::test]
    async fn test_server_filter() {
        let (facade, _dir) = facade_with(
            Box::new(KeepAllSelector),
            &[
                ("bash", vec![tool("read_file", ""), tool("list_directory", "")]),
                ("docs", vec![tool("search", "")]),
            ],
        )
        .await;

        let result = facade
            .service_call(OP_LIST_TOOL_NAMES, json!({"server": "bash"}), None)
            .await;
        let body = structured(&result);

        assert_eq!(body["total"], 2);
        assert_eq!(body["returned"], 2);
        assert_eq!(body["truncated"], false);
        let names: Vec<&str> = body["tool_names"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(names.contains(&"bash__read_file"));
        assert!(names.contains(&"bash__list_directory"));
    }

    #[tokio::test]
    async fn test_keyword_filter_or_semantics() {
        let (facade, _dir) = facade_with(
            Box::new(KeepAllSelector),
            &[(
                "a",
                vec![tool("foo", "cats"), tool("bar", "dogs"), tool("baz", "birds")],
            )],
        )
        .await;

        let result = facade
            .service_call(
                OP_LIST_TOOL_NAMES,
                json!({"keywords": ["cat", "dog"]}),
                None,
            )
            .await;
        let body = structured(&result);

        let mut names: Vec<&str> = body["tool_names"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a__bar", "a__foo"]);
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn test_limit_and_truncated() {
        let tools: Vec<ToolDefinition> =
            (0..5).map(|i| tool(&format!("t{i}"), "")).collect();
        let (facade, _dir) = facade_with(Box::new(KeepAllSelector), &[("a", tools)]).await;

        let result = facade
            .service_call(OP_LIST_TOOL_NAMES, json!({"limit": 3}), None)
            .await;
        let body = structured(&result);

        assert_eq!(body["total"], 5);
        assert_eq!(body["returned"], 3);
        assert_eq!(body["truncated"], true);

        let result = facade
            .service_call(OP_LIST_TOOL_NAMES, json!({"limit": 5}), None)
            .await;
        assert_eq!(structured(&result)["truncated"], false);
    }

    #[tokio::test]
    async fn test_get_tool_definition() {
        let (facade, _dir) = facade_with(
            Box::new(KeepAllSelector),
            &[("bash", vec![tool("read_file", "Read a file")])],
        )
        .await;

        let result = facade
            .service_call(
                OP_GET_TOOL_DEFINITION,
                json!({"tool_name": "bash__read_file"}),
                None,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(structured(&result)["name"], "bash__read_file");
        assert_eq!(structured(&result)["description"], "[bash] Read a file");

        let missing = facade
            .service_call(OP_GET_TOOL_DEFINITION, json!({"tool_name": "nope"}), None)
            .await;
        assert!(missing.is_error);
    }

    #[tokio::test]
    async fn test_search_result_is_subset_of_candidates() {
        let (facade, _dir) = facade_with(
            // The selector hallucinates a name outside the catalog.
            Box::new(FixedSelector(vec![
                "a__foo".to_string(),
                "ghost__tool".to_string(),
            ])),
            &[("a", vec![tool("foo", ""), tool("bar", "")])],
        )
        .await;

        let result = facade
            .service_call(OP_SEARCH_TOOLS, json!({"query": "anything"}), None)
            .await;
        let tools = structured(&result)["tools"].as_array().unwrap().clone();

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "a__foo");
    }

    #[tokio::test]
    async fn test_search_selector_failure_falls_back() {
        let (facade, _dir) = facade_with(
            Box::new(BrokenSelector),
            &[("a", vec![tool("foo", ""), tool("bar", "")])],
        )
        .await;

        let result = facade
            .service_call(OP_SEARCH_TOOLS, json!({"query": "anything"}), None)
            .await;
        assert!(!result.is_error);
        assert_eq!(structured(&result)["returned"], 2);
    }

    #[tokio::test]
    async fn test_search_limit() {
        let tools: Vec<ToolDefinition> =
            (0..4).map(|i| tool(&format!("t{i}"), "")).collect();
        let (facade, _dir) = facade_with(Box::new(KeepAllSelector), &[("a", tools)]).await;

        let result = facade
            .service_call(OP_SEARCH_TOOLS, json!({"limit": 2}), None)
            .await;
        assert_eq!(structured(&result)["returned"], 2);
    }

    #[tokio::test]
    async fn test_direct_dispatch_refused() {
        let (facade, _dir) = facade_with(
            Box::new(KeepAllSelector),
            &[("bash", vec![tool("read_file", "")])],
        )
        .await;

        let result = facade
            .service_call("bash__read_file", json!({"path": "/etc/hosts"}), None)
            .await;
        assert!(result.is_error);
        let ContentItem::Text { text } = &result.content[0] else {
            panic!("expected text content");
        };
        assert!(text.contains("execute_script"));
    }
}
