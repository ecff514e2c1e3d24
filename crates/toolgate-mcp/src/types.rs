//! Wire types for the tool protocol.
//!
//! The envelope is JSON-RPC 2.0 with two methods every peer understands:
//! `tools/list` and `tools/call`. The same envelope is spoken over
//! line-delimited stdio (local backends, the proxy's stdio service) and
//! over HTTP (remote backends, the in-sandbox proxy endpoint).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Method not found (JSON-RPC reserved code).
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: json!(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool definition advertised by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: Option<String>,
    /// Input schema (JSON Schema)
    pub input_schema: Value,
    /// Output schema, when the backend declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Result from calling a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Content returned by the tool
    pub content: Vec<ContentItem>,
    /// Structured payload, preferred by clients over `content` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether this is an error result
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            structured_content: None,
            is_error: false,
        }
    }

    /// A successful result carrying a structured payload.
    ///
    /// The payload is mirrored as a text part so that clients which only
    /// read `content` still see the data.
    pub fn structured(value: Value) -> Self {
        let text = serde_json::to_string(&value).unwrap_or_default();
        Self {
            content: vec![ContentItem::Text { text }],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// An in-band error result with a human-readable reason.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            structured_content: None,
            is_error: true,
        }
    }
}

/// Content item in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Text content with the text value.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (base64 encoded).
    Image {
        /// Base64 encoded image data.
        data: String,
        /// MIME type (e.g., "image/png").
        mime_type: String,
    },
    /// Resource content with URI reference.
    Resource {
        /// URI of the resource.
        uri: String,
        /// Optional text content.
        text: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_parse() {
        let json = r#"{
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            }
        }"#;

        let tool: ToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "read_file");
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn test_tool_result_parse() {
        let json = r#"{
            "content": [
                { "type": "text", "text": "hello" }
            ],
            "isError": false
        }"#;

        let result: ToolResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
    }

    #[test]
    fn test_structured_content_roundtrip() {
        let json = r#"{
            "content": [{ "type": "text", "text": "{\"n\":1}" }],
            "structuredContent": { "n": 1 },
            "isError": false
        }"#;

        let result: ToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.structured_content, Some(serde_json::json!({"n": 1})));

        let out = serde_json::to_value(&result).unwrap();
        assert!(out.get("structuredContent").is_some());
    }

    #[test]
    fn test_error_result() {
        let result = ToolResult::error("boom");
        assert!(result.is_error);
    }
}
