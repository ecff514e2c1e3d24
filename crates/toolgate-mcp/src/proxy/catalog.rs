//! The federated tool catalog.
//!
//! Catalog keys are qualified names, `backend__tool`. Backend names are
//! forbidden from containing the separator, so splitting on its FIRST
//! occurrence recovers the backend unambiguously even when raw tool
//! names contain the separator themselves.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::client::NAME_SEPARATOR;
use crate::types::ToolDefinition;

/// One catalog entry: a tool under its qualified name.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub qualified_name: String,
    pub backend: String,
    pub raw_name: String,
    /// Description as exposed to clients, prefixed with `[backend] `.
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}

impl CatalogEntry {
    /// The entry as a protocol tool definition.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.qualified_name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Build a qualified name.
pub fn qualify(backend: &str, raw_name: &str) -> String {
    format!("{backend}{NAME_SEPARATOR}{raw_name}")
}

/// Split a qualified name on the first separator occurrence.
pub fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once(NAME_SEPARATOR)
}

/// Thread-safe catalog: many readers, writers only during discovery and
/// backend eviction.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<HashMap<String, CatalogEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every tool of a backend under its qualified name.
    pub async fn insert_backend(&self, backend: &str, tools: &[ToolDefinition]) {
        let mut inner = self.inner.write().await;
        for tool in tools {
            let qualified = qualify(backend, &tool.name);
            inner.insert(
                qualified.clone(),
                CatalogEntry {
                    qualified_name: qualified,
                    backend: backend.to_string(),
                    raw_name: tool.name.clone(),
                    description: format!(
                        "[{backend}] {}",
                        tool.description.as_deref().unwrap_or_default()
                    ),
                    input_schema: tool.input_schema.clone(),
                    output_schema: tool.output_schema.clone(),
                },
            );
        }
    }

    /// Remove every tool belonging to a backend.
    pub async fn evict_backend(&self, backend: &str) {
        self.inner
            .write()
            .await
            .retain(|_, entry| entry.backend != backend);
    }

    pub async fn get(&self, qualified: &str) -> Option<CatalogEntry> {
        self.inner.read().await.get(qualified).cloned()
    }

    pub async fn contains(&self, qualified: &str) -> bool {
        self.inner.read().await.contains_key(qualified)
    }

    /// Every entry, in unspecified order.
    pub async fn entries(&self) -> Vec<CatalogEntry> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: json!({"type": "object"}),
            output_schema: None,
        }
    }

    #[test]
    fn test_split_first_occurrence() {
        assert_eq!(split_qualified("x__a__b"), Some(("x", "a__b")));
        assert_eq!(split_qualified("bash__read_file"), Some(("bash", "read_file")));
        assert_eq!(split_qualified("no_separator"), None);
    }

    #[tokio::test]
    async fn test_insert_and_decorate() {
        let catalog = Catalog::new();
        catalog
            .insert_backend("bash", &[tool("read_file", "Read a file")])
            .await;

        let entry = catalog.get("bash__read_file").await.unwrap();
        assert_eq!(entry.backend, "bash");
        assert_eq!(entry.raw_name, "read_file");
        assert_eq!(entry.description, "[bash] Read a file");
    }

    #[tokio::test]
    async fn test_evict_backend() {
        let catalog = Catalog::new();
        catalog.insert_backend("a", &[tool("x", ""), tool("y", "")]).await;
        catalog.insert_backend("b", &[tool("x", "")]).await;
        assert_eq!(catalog.len().await, 3);

        catalog.evict_backend("a").await;
        assert_eq!(catalog.len().await, 1);
        assert!(catalog.contains("b__x").await);
    }

    #[tokio::test]
    async fn test_no_duplicate_qualified_names() {
        let catalog = Catalog::new();
        catalog.insert_backend("a", &[tool("x", "first")]).await;
        catalog.insert_backend("a", &[tool("x", "second")]).await;
        assert_eq!(catalog.len().await, 1);
    }
}
