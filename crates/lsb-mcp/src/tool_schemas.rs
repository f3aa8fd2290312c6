use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use serde_json::{Value, json};

fn schema(value: Value) -> JsonObject {
    value.as_object().cloned().unwrap_or_default()
}

fn line_property() -> Value {
    json!({
        "description": "One-based line number, or a substring selecting the first line containing it.",
        "anyOf": [
            { "type": "integer", "minimum": 1 },
            { "type": "string" }
        ]
    })
}

pub(crate) fn all_tools() -> Vec<Tool> {
    vec![
        tool_get_hover(),
        tool_get_definitions(),
        tool_find_references(),
        tool_get_diagnostics(),
        tool_rename_symbol(),
        tool_delete_symbol(),
        tool_get_document_symbols(),
        tool_get_workspace_symbols(),
        tool_get_completion(),
        tool_get_signature_help(),
        tool_get_code_actions(),
        tool_format_document(),
        tool_format_range(),
        tool_search_symbols(),
    ]
}

fn tool_get_hover() -> Tool {
    Tool::new(
        Cow::Borrowed("get_hover"),
        Cow::Borrowed("Get hover information (signature and docs) at a location in a file."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "character": { "type": "integer", "minimum": 1 },
                "target": { "type": "string" }
            },
            "required": ["filePath", "line"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_definitions() -> Tool {
    Tool::new(
        Cow::Borrowed("get_definitions"),
        Cow::Borrowed("Find definition locations for a symbol on a line."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "symbolName": { "type": "string" }
            },
            "required": ["filePath", "line", "symbolName"],
            "additionalProperties": false
        }))),
    )
}

fn tool_find_references() -> Tool {
    Tool::new(
        Cow::Borrowed("find_references"),
        Cow::Borrowed(
            "Find all references to a symbol on a line, with surrounding context lines.",
        ),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "symbolName": { "type": "string" }
            },
            "required": ["filePath", "line", "symbolName"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_diagnostics() -> Tool {
    Tool::new(
        Cow::Borrowed("get_diagnostics"),
        Cow::Borrowed("Get diagnostics for files, grouped per file with counts."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePaths": { "type": "array", "items": { "type": "string" } },
                "pattern": {
                    "type": "string",
                    "description": "Glob over the root, used when filePaths is empty."
                }
            },
            "additionalProperties": false
        }))),
    )
}

fn tool_rename_symbol() -> Tool {
    Tool::new(
        Cow::Borrowed("rename_symbol"),
        Cow::Borrowed("Rename a symbol across the workspace and write the edits to disk."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "target": { "type": "string" },
                "newName": { "type": "string" }
            },
            "required": ["filePath", "target", "newName"],
            "additionalProperties": false
        }))),
    )
}

fn tool_delete_symbol() -> Tool {
    Tool::new(
        Cow::Borrowed("delete_symbol"),
        Cow::Borrowed("Delete a symbol definition, optionally removing its references too."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "symbolName": { "type": "string" },
                "removeReferences": { "type": "boolean", "default": false }
            },
            "required": ["filePath", "line", "symbolName"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_document_symbols() -> Tool {
    Tool::new(
        Cow::Borrowed("get_document_symbols"),
        Cow::Borrowed("List the symbol tree of a document with kind tags."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" }
            },
            "required": ["filePath"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_workspace_symbols() -> Tool {
    Tool::new(
        Cow::Borrowed("get_workspace_symbols"),
        Cow::Borrowed("Query the language server's workspace symbols, grouped by file."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "root": { "type": "string" }
            },
            "required": ["query"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_completion() -> Tool {
    Tool::new(
        Cow::Borrowed("get_completion"),
        Cow::Borrowed("Get completion candidates at a location in a file."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "character": { "type": "integer", "minimum": 1 },
                "target": { "type": "string" }
            },
            "required": ["filePath", "line"],
            "additionalProperties": false
        }))),
    )
}

fn tool_get_signature_help() -> Tool {
    Tool::new(
        Cow::Borrowed("get_signature_help"),
        Cow::Borrowed("Get signature help at a location, with the active parameter marked."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "line": line_property(),
                "target": { "type": "string" }
            },
            "required": ["filePath", "line"],
            "additionalProperties": false
        }))),
    )
}

fn range_property() -> Value {
    json!({
        "type": "object",
        "properties": {
            "start": {
                "type": "object",
                "properties": {
                    "line": { "type": "integer", "minimum": 1 },
                    "character": { "type": "integer", "minimum": 1 }
                },
                "required": ["line"]
            },
            "end": {
                "type": "object",
                "properties": {
                    "line": { "type": "integer", "minimum": 1 },
                    "character": { "type": "integer", "minimum": 1 }
                },
                "required": ["line"]
            }
        },
        "required": ["start", "end"]
    })
}

fn tool_get_code_actions() -> Tool {
    Tool::new(
        Cow::Borrowed("get_code_actions"),
        Cow::Borrowed("List code actions available for a range (one-based)."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "range": range_property()
            },
            "required": ["filePath", "range"],
            "additionalProperties": false
        }))),
    )
}

fn tool_format_document() -> Tool {
    Tool::new(
        Cow::Borrowed("format_document"),
        Cow::Borrowed("Preview formatting changes for a whole document."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "options": {
                    "type": "object",
                    "properties": {
                        "tabSize": { "type": "integer", "minimum": 1 },
                        "insertSpaces": { "type": "boolean" }
                    }
                }
            },
            "required": ["filePath"],
            "additionalProperties": false
        }))),
    )
}

fn tool_format_range() -> Tool {
    Tool::new(
        Cow::Borrowed("format_range"),
        Cow::Borrowed("Preview formatting changes for a range (one-based)."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "filePath": { "type": "string" },
                "range": range_property(),
                "options": {
                    "type": "object",
                    "properties": {
                        "tabSize": { "type": "integer", "minimum": 1 },
                        "insertSpaces": { "type": "boolean" }
                    }
                }
            },
            "required": ["filePath", "range"],
            "additionalProperties": false
        }))),
    )
}

fn tool_search_symbols() -> Tool {
    Tool::new(
        Cow::Borrowed("search_symbols"),
        Cow::Borrowed("Search the persistent symbol index by name, kind, and container."),
        Arc::new(schema(json!({
            "type": "object",
            "properties": {
                "root": { "type": "string" },
                "name": { "type": "string" },
                "kind": {
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ]
                },
                "containerName": { "type": "string" },
                "file": { "type": "string" },
                "includeChildren": { "type": "boolean", "default": true },
                "includeExternal": { "type": "boolean", "default": false },
                "onlyExternal": { "type": "boolean", "default": false },
                "sourceLibrary": { "type": "string" }
            },
            "additionalProperties": false
        }))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema() {
        let tools = all_tools();
        assert_eq!(tools.len(), 14);
        for tool in &tools {
            assert_eq!(
                tool.input_schema.get("type").and_then(|v| v.as_str()),
                Some("object"),
                "tool {} lacks an object schema",
                tool.name
            );
        }
    }

    #[test]
    fn tool_names_are_unique() {
        let tools = all_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}
