//! JSON Schema to TypeScript type mapping.
//!
//! The mapping is intentionally shallow: object schemas become inline
//! record types, arrays become element-type arrays, the five primitive
//! forms map to their obvious TypeScript counterparts, and anything else
//! falls back to `unknown`.

use serde_json::Value;

/// Make a schema property name a valid TypeScript identifier:
/// non-alphanumerics become underscores, a leading digit is prefixed.
pub fn sanitize_ident(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// PascalCase form of a sanitized identifier, for type names.
pub fn pascal_case(name: &str) -> String {
    sanitize_ident(name)
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// The TypeScript type for a schema node.
pub fn ts_type(schema: &Value) -> String {
    // A list of enum values becomes a union of literals.
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let literals: Vec<String> = values
            .iter()
            .map(|v| match v {
                Value::String(s) => format!("{s:?}"),
                other => other.to_string(),
            })
            .collect();
        if !literals.is_empty() {
            return literals.join(" | ");
        }
    }

    match schema.get("type") {
        Some(Value::String(kind)) => ts_type_for(kind, schema),
        // A list of types becomes a union.
        Some(Value::Array(kinds)) => {
            let parts: Vec<String> = kinds
                .iter()
                .filter_map(Value::as_str)
                .map(|kind| ts_type_for(kind, schema))
                .collect();
            if parts.is_empty() {
                "unknown".to_string()
            } else {
                parts.join(" | ")
            }
        }
        _ => "unknown".to_string(),
    }
}

fn ts_type_for(kind: &str, schema: &Value) -> String {
    match kind {
        "string" => "string".to_string(),
        "number" | "integer" => "number".to_string(),
        "boolean" => "boolean".to_string(),
        "null" => "null".to_string(),
        "array" => {
            let inner = schema
                .get("items")
                .map(ts_type)
                .unwrap_or_else(|| "unknown".to_string());
            if inner.contains('|') || inner.contains('{') {
                format!("Array<{inner}>")
            } else {
                format!("{inner}[]")
            }
        }
        "object" => object_type(schema),
        _ => "unknown".to_string(),
    }
}

fn object_type(schema: &Value) -> String {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return "Record<string, unknown>".to_string();
    };
    if properties.is_empty() {
        return "Record<string, unknown>".to_string();
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields: Vec<String> = Vec::new();
    let mut names: Vec<&String> = properties.keys().collect();
    names.sort();

    for name in names {
        let prop = &properties[name];
        let optional = if required.contains(&name.as_str()) { "" } else { "?" };
        fields.push(format!(
            "{}{}: {}",
            sanitize_ident(name),
            optional,
            ts_type(prop)
        ));
    }

    format!("{{ {} }}", fields.join("; "))
}

/// Render the fields of an object schema as interface members, one per
/// line. Returns `None` when the schema is not an object with properties.
pub fn interface_members(schema: &Value) -> Option<Vec<String>> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.is_empty() {
        return None;
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut names: Vec<&String> = properties.keys().collect();
    names.sort();

    Some(
        names
            .into_iter()
            .map(|name| {
                let prop = &properties[name];
                let optional = if required.contains(&name.as_str()) { "" } else { "?" };
                let mut member = String::new();
                if let Some(description) = prop.get("description").and_then(Value::as_str) {
                    member.push_str(&format!("  /** {} */\n", description.replace("*/", "*\\/")));
                }
                member.push_str(&format!(
                    "  {}{}: {};",
                    sanitize_ident(name),
                    optional,
                    ts_type(prop)
                ));
                member
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(sanitize_ident("file-path"), "file_path");
        assert_eq!(sanitize_ident("a.b.c"), "a_b_c");
        assert_eq!(sanitize_ident("9lives"), "_9lives");
        assert_eq!(sanitize_ident("ok_name"), "ok_name");
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("read_file"), "ReadFile");
        assert_eq!(pascal_case("query-docs"), "QueryDocs");
    }

    #[test]
    fn test_primitives() {
        assert_eq!(ts_type(&json!({"type": "string"})), "string");
        assert_eq!(ts_type(&json!({"type": "integer"})), "number");
        assert_eq!(ts_type(&json!({"type": "number"})), "number");
        assert_eq!(ts_type(&json!({"type": "boolean"})), "boolean");
        assert_eq!(ts_type(&json!({"type": "null"})), "null");
        assert_eq!(ts_type(&json!({})), "unknown");
    }

    #[test]
    fn test_array_types() {
        assert_eq!(
            ts_type(&json!({"type": "array", "items": {"type": "string"}})),
            "string[]"
        );
        assert_eq!(ts_type(&json!({"type": "array"})), "unknown[]");
        assert_eq!(
            ts_type(&json!({"type": "array", "items": {"type": ["string", "null"]}})),
            "Array<string | null>"
        );
    }

    #[test]
    fn test_object_with_required() {
        let ty = ts_type(&json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "depth": {"type": "integer"}
            },
            "required": ["path"]
        }));
        assert_eq!(ty, "{ depth?: number; path: string }");
    }

    #[test]
    fn test_bare_object() {
        assert_eq!(
            ts_type(&json!({"type": "object"})),
            "Record<string, unknown>"
        );
    }

    #[test]
    fn test_enum_union() {
        assert_eq!(
            ts_type(&json!({"type": "string", "enum": ["a", "b"]})),
            "\"a\" | \"b\""
        );
    }

    #[test]
    fn test_interface_members() {
        let members = interface_members(&json!({
            "type": "object",
            "properties": {
                "file-path": {"type": "string", "description": "Path to read"}
            },
            "required": ["file-path"]
        }))
        .unwrap();

        assert_eq!(members.len(), 1);
        assert!(members[0].contains("/** Path to read */"));
        assert!(members[0].contains("file_path: string;"));
    }
}
