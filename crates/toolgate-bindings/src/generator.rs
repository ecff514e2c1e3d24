//! Typed stub generation.
//!
//! Runs once after discovery. For every backend, one TypeScript module
//! per tool plus an index; then a top-level index re-exporting every
//! backend namespace, and the shared `client.ts` transport helper that
//! speaks the envelope to the in-sandbox proxy.
//!
//! Generation is deterministic: entries are visited in sorted order, so
//! the same catalog always produces byte-equal output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use toolgate_mcp::CatalogEntry;

use crate::schema::{interface_members, pascal_case, sanitize_ident, ts_type};
use crate::BindingError;

/// Summary of one generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedBindings {
    pub backends: usize,
    pub tools: usize,
}

/// Writes tool stubs under an output directory
/// (conventionally `<root>/generated`).
pub struct BindingGenerator {
    output_dir: PathBuf,
}

impl BindingGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Generate stubs for every catalog entry.
    pub fn generate(&self, entries: &[CatalogEntry]) -> Result<GeneratedBindings, BindingError> {
        // backend -> raw tool name -> entry, both levels sorted
        let mut by_backend: BTreeMap<&str, BTreeMap<&str, &CatalogEntry>> = BTreeMap::new();
        for entry in entries {
            by_backend
                .entry(entry.backend.as_str())
                .or_default()
                .insert(entry.raw_name.as_str(), entry);
        }

        let servers_dir = self.output_dir.join("servers");
        std::fs::create_dir_all(&servers_dir)?;

        let mut tools = 0;
        for (backend, backend_tools) in &by_backend {
            let backend_dir = servers_dir.join(backend);
            std::fs::create_dir_all(&backend_dir)?;

            let mut index_lines = Vec::new();
            for (raw_name, entry) in backend_tools {
                let module = sanitize_ident(raw_name);
                write_file(
                    &backend_dir.join(format!("{module}.ts")),
                    &tool_module(entry),
                )?;
                index_lines.push(format!(
                    "export {{ {} }} from \"./{}.ts\";\n",
                    module, module
                ));
                tools += 1;
            }

            write_file(&backend_dir.join("index.ts"), &index_lines.join(""))?;
        }

        let top_index: String = by_backend
            .keys()
            .map(|backend| {
                format!(
                    "export * as {} from \"./{}/index.ts\";\n",
                    sanitize_ident(backend),
                    backend
                )
            })
            .collect();
        write_file(&servers_dir.join("index.ts"), &top_index)?;

        write_file(&self.output_dir.join("client.ts"), CLIENT_MODULE)?;

        info!(
            backends = by_backend.len(),
            tools, "generated tool bindings"
        );
        Ok(GeneratedBindings {
            backends: by_backend.len(),
            tools,
        })
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), BindingError> {
    std::fs::write(path, content)?;
    Ok(())
}

/// Render one tool module.
fn tool_module(entry: &CatalogEntry) -> String {
    let function = sanitize_ident(&entry.raw_name);
    let type_base = pascal_case(&entry.raw_name);
    let input_type = format!("{type_base}Input");
    let result_type = format!("{type_base}Result");

    let mut out = String::new();
    out.push_str("// Generated by toolgate from the live tool catalog. Do not edit.\n");
    out.push_str("import { invoke } from \"../../client.ts\";\n\n");

    match interface_members(&entry.input_schema) {
        Some(members) => {
            out.push_str(&format!("export interface {input_type} {{\n"));
            for member in members {
                out.push_str(&member);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        None => {
            out.push_str(&format!(
                "export type {input_type} = {};\n\n",
                ts_type(&entry.input_schema)
            ));
        }
    }

    let result_ts = entry
        .output_schema
        .as_ref()
        .map(ts_type)
        .unwrap_or_else(|| "unknown".to_string());
    out.push_str(&format!("export type {result_type} = {result_ts};\n\n"));

    out.push_str(&format!(
        "/**\n * {}\n */\n",
        entry.description.replace("*/", "*\\/")
    ));
    out.push_str(&format!(
        "export async function {function}(input: {input_type}): Promise<{result_type}> {{\n  return (await invoke({:?}, input)) as {result_type};\n}}\n",
        entry.qualified_name
    ));

    out
}

/// The shared transport helper dropped next to the stubs.
///
/// Structured content is preferred; text-only replies are parsed as JSON
/// when possible; error results raise with the backend-supplied reason.
const CLIENT_MODULE: &str = r#"// Generated by toolgate. Speaks the tool protocol to the in-sandbox proxy.

const PROXY_ENDPOINT =
  process.env.TOOLGATE_PROXY_ENDPOINT ?? "http://127.0.0.1:8700/mcp";

let nextId = 1;

interface ContentPart {
  type: string;
  text?: string;
}

function collectText(content: ContentPart[] | undefined): string {
  return (content ?? [])
    .filter((part) => part.type === "text" && typeof part.text === "string")
    .map((part) => part.text)
    .join("\n");
}

export async function invoke(
  qualifiedName: string,
  args: unknown,
): Promise<unknown> {
  const response = await fetch(PROXY_ENDPOINT, {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({
      jsonrpc: "2.0",
      id: nextId++,
      method: "tools/call",
      params: { name: qualifiedName, arguments: args },
    }),
  });

  const reply = await response.json();
  if (reply.error) {
    throw new Error(reply.error.message ?? JSON.stringify(reply.error));
  }

  const result = reply.result ?? {};
  if (result.isError) {
    throw new Error(collectText(result.content) || `${qualifiedName} failed`);
  }

  if (result.structuredContent !== undefined) {
    return result.structuredContent;
  }

  const text = collectText(result.content);
  try {
    return JSON.parse(text);
  } catch {
    return text;
  }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(backend: &str, raw: &str) -> CatalogEntry {
        CatalogEntry {
            qualified_name: format!("{backend}__{raw}"),
            backend: backend.to_string(),
            raw_name: raw.to_string(),
            description: format!("[{backend}] does {raw}"),
            input_schema: json!({
                "type": "object",
                "properties": { "path": {"type": "string"} },
                "required": ["path"]
            }),
            output_schema: None,
        }
    }

    fn read(dir: &Path, rel: &str) -> String {
        std::fs::read_to_string(dir.join(rel)).unwrap()
    }

    #[test]
    fn test_generates_stub_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let generator = BindingGenerator::new(dir.path());

        let summary = generator
            .generate(&[entry("bash", "read_file"), entry("bash", "list_directory")])
            .unwrap();
        assert_eq!(summary, GeneratedBindings { backends: 1, tools: 2 });

        let stub = read(dir.path(), "servers/bash/read_file.ts");
        assert!(stub.contains("export interface ReadFileInput"));
        assert!(stub.contains("path: string;"));
        assert!(stub.contains("export async function read_file"));
        assert!(stub.contains("\"bash__read_file\""));

        let index = read(dir.path(), "servers/bash/index.ts");
        assert!(index.contains("export { list_directory }"));
        assert!(index.contains("export { read_file }"));

        let top = read(dir.path(), "servers/index.ts");
        assert_eq!(top, "export * as bash from \"./bash/index.ts\";\n");

        assert!(dir.path().join("client.ts").exists());
    }

    #[test]
    fn test_generation_is_deterministic() {
        let entries = vec![
            entry("b", "zeta"),
            entry("a", "alpha"),
            entry("b", "alpha"),
        ];

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        BindingGenerator::new(first.path()).generate(&entries).unwrap();

        // Same catalog, different insertion order.
        let mut reversed = entries.clone();
        reversed.reverse();
        BindingGenerator::new(second.path()).generate(&reversed).unwrap();

        for rel in [
            "servers/index.ts",
            "servers/a/index.ts",
            "servers/b/index.ts",
            "servers/b/zeta.ts",
            "client.ts",
        ] {
            assert_eq!(read(first.path(), rel), read(second.path(), rel), "{rel}");
        }
    }

    #[test]
    fn test_sanitized_tool_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = entry("docs", "query-docs");
        e.qualified_name = "docs__query-docs".to_string();
        e.raw_name = "query-docs".to_string();

        BindingGenerator::new(dir.path()).generate(&[e]).unwrap();

        let stub = read(dir.path(), "servers/docs/query_docs.ts");
        assert!(stub.contains("export async function query_docs"));
        assert!(stub.contains("\"docs__query-docs\""));
    }

    #[test]
    fn test_output_schema_maps_result_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = entry("docs", "count");
        e.output_schema = Some(json!({"type": "integer"}));

        BindingGenerator::new(dir.path()).generate(&[e]).unwrap();
        let stub = read(dir.path(), "servers/docs/count.ts");
        assert!(stub.contains("export type CountResult = number;"));
    }
}
