use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use lsb_core::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub use lsb_core::text_edit::{Position, Range, TextEdit};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationLink {
    pub target_uri: String,
    pub target_range: Range,
    pub target_selection_range: Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u32>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
    #[serde(default)]
    pub related_information: Option<Vec<Value>>,
}

impl Diagnostic {
    pub fn severity_label(&self) -> &'static str {
        match self.severity {
            Some(1) => "error",
            Some(2) => "warning",
            Some(3) => "information",
            Some(4) => "hint",
            _ => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Some(1) | None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub kind: u32,
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<u32>>,
    pub range: Range,
    pub selection_range: Range,
    #[serde(default)]
    pub children: Vec<DocumentSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInformation {
    pub name: String,
    pub kind: u32,
    #[serde(default)]
    pub deprecated: Option<bool>,
    pub location: Location,
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionalVersionedTextDocumentIdentifier {
    uri: String,
    #[serde(default)]
    version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextDocumentEdit {
    text_document: OptionalVersionedTextDocumentIdentifier,
    edits: Vec<TextEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkspaceEdit {
    #[serde(default)]
    changes: Option<HashMap<String, Vec<TextEdit>>>,
    #[serde(default)]
    document_changes: Option<Vec<Value>>,
}

/// Flatten a WorkspaceEdit into URI → ordered text edits.
///
/// `documentChanges` entries carrying file operations (create/rename/delete)
/// are not supported; the baseline is text edits only.
pub fn normalize_workspace_edit(value: Value) -> Result<HashMap<String, Vec<TextEdit>>> {
    let edit: RawWorkspaceEdit = serde_json::from_value(value)
        .map_err(|e| BrokerError::InvalidArgument(format!("malformed WorkspaceEdit: {e}")))?;
    let mut out = edit.changes.unwrap_or_default();

    let Some(document_changes) = edit.document_changes else {
        return Ok(out);
    };

    for change in document_changes {
        if let Some(kind) = change.get("kind").and_then(|v| v.as_str()) {
            return Err(BrokerError::Unsupported(format!(
                "workspace edit contains a file operation ({kind}); only text edits are supported"
            )));
        }
        let is_text_document_edit =
            change.get("textDocument").is_some() && change.get("edits").is_some();
        if !is_text_document_edit {
            continue;
        }
        let tde: TextDocumentEdit = serde_json::from_value(change).map_err(|e| {
            BrokerError::InvalidArgument(format!("malformed TextDocumentEdit: {e}"))
        })?;
        out.entry(tde.text_document.uri)
            .or_default()
            .extend(tde.edits);
    }

    Ok(out)
}

/// Location responses come in three shapes: Location, Location[], and
/// LocationLink[]. Collapse them all to a flat Location list.
pub fn collect_locations(value: Value) -> anyhow::Result<Vec<Location>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let items = match value {
        Value::Array(arr) => arr,
        v @ Value::Object(_) => vec![v],
        _ => anyhow::bail!("location response is neither array nor object"),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.get("uri").is_some() {
            let loc: Location =
                serde_json::from_value(item).context("failed to parse Location")?;
            out.push(loc);
        } else if item.get("targetUri").is_some() {
            let link: LocationLink =
                serde_json::from_value(item).context("failed to parse LocationLink")?;
            out.push(Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            });
        }
    }
    Ok(out)
}

pub fn path_to_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map_err(|_| {
            BrokerError::InvalidArgument(format!("not an absolute file path: {}", path.display()))
        })
        .map(|u| u.to_string())
}

pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
    let url = Url::parse(uri)
        .map_err(|e| BrokerError::InvalidArgument(format!("invalid URI {uri}: {e}")))?;
    if url.scheme() != "file" {
        return Err(BrokerError::InvalidArgument(format!(
            "unsupported URI scheme: {}",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|_| BrokerError::InvalidArgument(format!("URI has no local path: {uri}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_changes_and_document_changes() {
        let value = json!({
            "changes": {
                "file:///a.ts": [
                    { "range": { "start": { "line": 0, "character": 0 },
                                 "end": { "line": 0, "character": 3 } },
                      "newText": "abc" }
                ]
            },
            "documentChanges": [
                { "textDocument": { "uri": "file:///b.ts", "version": 3 },
                  "edits": [
                    { "range": { "start": { "line": 1, "character": 0 },
                                 "end": { "line": 1, "character": 1 } },
                      "newText": "x" }
                  ] }
            ]
        });

        let out = normalize_workspace_edit(value).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["file:///a.ts"][0].new_text, "abc");
        assert_eq!(out["file:///b.ts"][0].new_text, "x");
    }

    #[test]
    fn file_operations_are_unsupported() {
        let value = json!({
            "documentChanges": [
                { "kind": "rename", "oldUri": "file:///a.ts", "newUri": "file:///b.ts" }
            ]
        });
        let err = normalize_workspace_edit(value).unwrap_err();
        assert!(matches!(err, BrokerError::Unsupported(_)));
    }

    #[test]
    fn collect_locations_handles_links_and_single_objects() {
        let single = json!({
            "uri": "file:///a.ts",
            "range": { "start": { "line": 0, "character": 0 },
                       "end": { "line": 0, "character": 1 } }
        });
        assert_eq!(collect_locations(single).unwrap().len(), 1);

        let links = json!([{
            "targetUri": "file:///b.ts",
            "targetRange": { "start": { "line": 0, "character": 0 },
                             "end": { "line": 2, "character": 0 } },
            "targetSelectionRange": { "start": { "line": 0, "character": 4 },
                                      "end": { "line": 0, "character": 9 } }
        }]);
        let locs = collect_locations(links).unwrap();
        assert_eq!(locs[0].uri, "file:///b.ts");
        assert_eq!(locs[0].range.start.character, 4);
    }

    #[test]
    fn null_location_response_is_empty() {
        assert!(collect_locations(Value::Null).unwrap().is_empty());
    }
}
