use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde_json::Value;

use lsb_lsp::proto::{Diagnostic, Location};
use lsb_lsp::symbol::{SymbolNode, symbol_kind_name};
use lsb_index::SymbolEntry;
use lsb_lsp::uri_to_path;

use crate::resolve::display_path;
use crate::workspace_edit::FileChanges;

/// Cap applied to every tool's text output.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 100_000;

pub fn truncate_output(mut text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let keep: usize = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text.truncate(keep);
    text.push_str("\n... (output truncated)");
    text
}

/// Hover contents arrive as MarkedString, MarkedString[], or MarkupContent.
pub fn render_hover(value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let contents = value.get("contents")?;
    let text = match contents {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(hover_part)
                .filter(|s| !s.trim().is_empty())
                .collect();
            if parts.is_empty() {
                return None;
            }
            parts.join("\n\n")
        }
        Value::Object(_) => hover_part(contents)?,
        _ => return None,
    };
    let text = text.trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

fn hover_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        // MarkupContent and MarkedString both carry `value`.
        Value::Object(obj) => obj
            .get("value")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

pub fn render_definitions(root: &Path, symbol: &str, locations: &[Location]) -> String {
    if locations.is_empty() {
        return format!("No definitions found for \"{symbol}\".");
    }
    let mut out = format!(
        "Found {} definition{} for \"{symbol}\":\n",
        locations.len(),
        plural(locations.len())
    );
    for loc in locations {
        let _ = writeln!(out, "  {}", location_label(root, loc));
    }
    out
}

/// One block per occurrence: the line itself plus the preceding and
/// following source line when they exist. Files that cannot be read (for
/// instance deleted mid-render) are skipped.
pub fn render_references(root: &Path, symbol: &str, locations: &[Location]) -> String {
    if locations.is_empty() {
        return format!("No references found for \"{symbol}\".");
    }
    let mut out = format!(
        "Found {} reference{} to \"{symbol}\":\n",
        locations.len(),
        plural(locations.len())
    );
    for loc in locations {
        let Ok(path) = uri_to_path(&loc.uri) else {
            continue;
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let _ = writeln!(out, "\n{}", location_label(root, loc));
        let snippet = lsb_core::snippet::extract_snippet(&content, loc.range.start.line, 1);
        for (offset, line) in snippet.lines.iter().enumerate() {
            let line_no = snippet.start_line + offset as u32;
            let marker = if line_no == loc.range.start.line {
                ">"
            } else {
                " "
            };
            let _ = writeln!(out, "  {marker} {} | {line}", line_no + 1);
        }
    }
    out
}

pub fn location_label(root: &Path, loc: &Location) -> String {
    let path = uri_to_path(&loc.uri)
        .map(|p| display_path(root, &p))
        .unwrap_or_else(|_| loc.uri.clone());
    format!(
        "{path}:{}:{}",
        loc.range.start.line + 1,
        loc.range.start.character + 1
    )
}

pub fn render_diagnostics(root: &Path, per_file: &[(PathBuf, Vec<Diagnostic>)]) -> String {
    let total: usize = per_file.iter().map(|(_, d)| d.len()).sum();
    if total == 0 {
        return "No diagnostics found.".to_string();
    }

    let errors: usize = per_file
        .iter()
        .flat_map(|(_, diags)| diags.iter())
        .filter(|d| d.severity_label() == "error")
        .count();
    let warnings: usize = per_file
        .iter()
        .flat_map(|(_, diags)| diags.iter())
        .filter(|d| d.severity_label() == "warning")
        .count();

    let mut out = format!(
        "{total} diagnostic{} ({errors} error{}, {warnings} warning{}):\n",
        plural(total),
        plural(errors),
        plural(warnings)
    );
    for (path, diags) in per_file {
        if diags.is_empty() {
            continue;
        }
        let _ = writeln!(
            out,
            "\n{} ({} issue{}):",
            display_path(root, path),
            diags.len(),
            plural(diags.len())
        );
        for d in diags {
            let code = d
                .code
                .as_ref()
                .map(|c| match c {
                    Value::String(s) => format!(" [{s}]"),
                    other => format!(" [{other}]"),
                })
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {}:{} {}: {}{code}",
                d.range.start.line + 1,
                d.range.start.character + 1,
                d.severity_label(),
                d.message.trim()
            );
        }
    }
    out
}

pub fn render_symbol_tree(path_label: &str, symbols: &[SymbolNode]) -> String {
    if symbols.is_empty() {
        return format!("No symbols in {path_label}.");
    }
    let mut out = format!("Symbols in {path_label}:\n");
    for node in symbols {
        write_symbol_node(&mut out, node, 0);
    }
    out
}

fn write_symbol_node(out: &mut String, node: &SymbolNode, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    let deprecated = if node.deprecated { " (deprecated)" } else { "" };
    let detail = node
        .detail
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(|d| format!(" - {d}"))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "{indent}{} [{}] @ {}:{}{deprecated}{detail}",
        node.name,
        symbol_kind_name(node.kind),
        node.selection_range.start.line + 1,
        node.selection_range.start.character + 1,
    );
    for child in &node.children {
        write_symbol_node(out, child, depth + 1);
    }
}

/// Workspace symbols grouped by file, in file order.
pub fn render_grouped_symbols(root: &Path, entries: &[(String, u32, Location)]) -> String {
    if entries.is_empty() {
        return "No matching symbols found.".to_string();
    }

    let mut out = format!(
        "Found {} symbol{}:\n",
        entries.len(),
        plural(entries.len())
    );
    let mut current_file: Option<String> = None;
    for (name, kind, loc) in entries {
        let file = uri_to_path(&loc.uri)
            .map(|p| display_path(root, &p))
            .unwrap_or_else(|_| loc.uri.clone());
        if current_file.as_deref() != Some(file.as_str()) {
            let _ = writeln!(out, "\n{file}:");
            current_file = Some(file);
        }
        let _ = writeln!(
            out,
            "  {name} [{}] @ {}:{}",
            symbol_kind_name(*kind),
            loc.range.start.line + 1,
            loc.range.start.character + 1
        );
    }
    out
}

pub fn render_search_results(root: &Path, entries: &[SymbolEntry]) -> String {
    if entries.is_empty() {
        return "No matching symbols found.".to_string();
    }
    let mut out = format!(
        "Found {} symbol{}:\n",
        entries.len(),
        plural(entries.len())
    );
    for entry in entries {
        let file = uri_to_path(&entry.uri)
            .map(|p| display_path(root, &p))
            .unwrap_or_else(|_| entry.uri.clone());
        let container = entry
            .container
            .as_deref()
            .map(|c| format!(" in {c}"))
            .unwrap_or_default();
        let library = entry
            .source_library
            .as_deref()
            .map(|l| format!(" (from {l})"))
            .unwrap_or_default();
        let deprecated = if entry.deprecated {
            " (deprecated)"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  {} [{}]{container} - {file}:{}:{}{library}{deprecated}",
            entry.name,
            symbol_kind_name(entry.kind),
            entry.range.start.line + 1,
            entry.range.start.character + 1
        );
    }
    out
}

pub fn render_completions(value: &Value, limit: usize) -> String {
    let items = value
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .or_else(|| value.as_array().cloned())
        .unwrap_or_default();
    if items.is_empty() {
        return "No completions available.".to_string();
    }

    let shown = items.len().min(limit);
    let mut out = format!(
        "{} completion{}{}:\n",
        items.len(),
        plural(items.len()),
        if items.len() > shown {
            format!(" (showing {shown})")
        } else {
            String::new()
        }
    );
    for item in items.iter().take(shown) {
        let label = item.get("label").and_then(|v| v.as_str()).unwrap_or("?");
        let detail = item
            .get("detail")
            .and_then(|v| v.as_str())
            .filter(|d| !d.trim().is_empty())
            .map(|d| format!(" - {d}"))
            .unwrap_or_default();
        let _ = writeln!(out, "  {label}{detail}");
    }
    out
}

/// Signature help with an arrow marking the active parameter.
pub fn render_signature_help(value: &Value) -> Option<String> {
    let signatures = value.get("signatures")?.as_array()?;
    if signatures.is_empty() {
        return None;
    }
    let active_signature = value
        .get("activeSignature")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let signature = signatures
        .get(active_signature)
        .or_else(|| signatures.first())?;

    let label = signature.get("label").and_then(|v| v.as_str())?;
    let mut out = label.to_string();

    let active_parameter = signature
        .get("activeParameter")
        .or_else(|| value.get("activeParameter"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let parameters = signature
        .get("parameters")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    if let Some(param) = parameters.get(active_parameter) {
        let span = match param.get("label") {
            Some(Value::String(s)) => label.find(s.as_str()).map(|start| (start, start + s.len())),
            Some(Value::Array(pair)) if pair.len() == 2 => {
                match (pair[0].as_u64(), pair[1].as_u64()) {
                    (Some(start), Some(end)) => Some((start as usize, end as usize)),
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some((start, end)) = span
            && end <= label.len()
            && start < end
        {
            let mut arrow_line = String::new();
            arrow_line.push_str(&" ".repeat(label[..start].chars().count()));
            arrow_line.push_str(&"^".repeat(label[start..end].chars().count()));
            let param_name = &label[start..end];
            let _ = write!(out, "\n{arrow_line} ← active parameter: {param_name}");
        }
    }

    if let Some(doc) = signature
        .get("documentation")
        .and_then(|d| d.as_str().map(str::to_string).or_else(|| hover_part(d)))
        && !doc.trim().is_empty()
    {
        let _ = write!(out, "\n\n{}", doc.trim());
    }

    Some(out)
}

pub fn render_code_actions(value: &Value) -> String {
    let actions = value.as_array().cloned().unwrap_or_default();
    if actions.is_empty() {
        return "No code actions available.".to_string();
    }
    let mut out = format!(
        "{} code action{}:\n",
        actions.len(),
        plural(actions.len())
    );
    for action in &actions {
        let title = action.get("title").and_then(|v| v.as_str()).unwrap_or("?");
        let kind = action
            .get("kind")
            .and_then(|v| v.as_str())
            .map(|k| format!(" [{k}]"))
            .unwrap_or_default();
        let preferred = action
            .get("isPreferred")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let marker = if preferred { "*" } else { "-" };
        let _ = writeln!(out, "  {marker} {title}{kind}");
    }
    out
}

/// Rename/format output: changed files with `"old" → "new"` pairs.
pub fn render_change_summaries(root: &Path, header: &str, changes: &[FileChanges]) -> String {
    if changes.is_empty() {
        return format!("{header}: no changes.");
    }
    let mut out = format!(
        "{header}: {} file{} changed\n",
        changes.len(),
        plural(changes.len())
    );
    for file in changes {
        let _ = writeln!(
            out,
            "\n{} ({} change{}):",
            display_path(root, &file.path),
            file.summaries.len(),
            plural(file.summaries.len())
        );
        for s in &file.summaries {
            let _ = writeln!(
                out,
                "  {}:{} {:?} → {:?}",
                s.line + 1,
                s.character + 1,
                compact(&s.old_text),
                compact(&s.new_text)
            );
        }
    }
    out
}

fn compact(text: &str) -> String {
    const MAX: usize = 60;
    let flat = text.replace('\n', "\\n");
    if flat.chars().count() <= MAX {
        return flat;
    }
    let mut out: String = flat.chars().take(MAX).collect();
    out.push('…');
    out
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsb_core::text_edit::{Position, Range};
    use serde_json::json;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range {
            start: Position {
                line: sl,
                character: sc,
            },
            end: Position {
                line: el,
                character: ec,
            },
        }
    }

    #[test]
    fn hover_handles_markup_and_marked_strings() {
        let markup = json!({ "contents": { "kind": "markdown", "value": "```ts\nfn greet()\n```" } });
        assert!(render_hover(&markup).unwrap().contains("fn greet()"));

        let marked = json!({ "contents": ["first", { "language": "ts", "value": "second" }] });
        let text = render_hover(&marked).unwrap();
        assert!(text.contains("first"));
        assert!(text.contains("second"));

        assert!(render_hover(&Value::Null).is_none());
        assert!(render_hover(&json!({ "contents": [] })).is_none());
    }

    #[test]
    fn references_include_surrounding_lines_and_one_based_columns() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let file = root.join("b.ts");
        std::fs::write(&file, "import {greet} from './a';\ngreet('w');\nexport {};\n").unwrap();

        let locations = vec![Location {
            uri: lsb_lsp::path_to_uri(&file).unwrap(),
            range: range(1, 0, 1, 5),
        }];
        let out = render_references(&root, "greet", &locations);

        assert!(out.contains("b.ts:2:1"));
        assert!(out.contains("  1 | import {greet} from './a';"));
        assert!(out.contains("> 2 | greet('w');"));
        assert!(out.contains("  3 | export {};"));
    }

    #[test]
    fn references_skip_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let locations = vec![Location {
            uri: lsb_lsp::path_to_uri(&root.join("vanished.ts")).unwrap(),
            range: range(0, 0, 0, 5),
        }];
        let out = render_references(&root, "greet", &locations);
        assert!(out.starts_with("Found 1 reference"));
        assert!(!out.contains("vanished.ts:"));
    }

    #[test]
    fn diagnostics_group_by_file_with_counts() {
        let root = Path::new("/project");
        let diag = |line: u32, severity: u32, message: &str| Diagnostic {
            range: range(line, 0, line, 5),
            severity: Some(severity),
            code: Some(json!("TS2322")),
            source: None,
            message: message.to_string(),
            related_information: None,
        };
        let per_file = vec![
            (PathBuf::from("/project/a.ts"), vec![
                diag(0, 1, "type mismatch"),
                diag(3, 2, "unused variable"),
            ]),
            (PathBuf::from("/project/b.ts"), vec![]),
        ];

        let out = render_diagnostics(root, &per_file);
        assert!(out.starts_with("2 diagnostics (1 error, 1 warning):"));
        assert!(out.contains("a.ts (2 issues):"));
        assert!(out.contains("1:1 error: type mismatch [TS2322]"));
        assert!(out.contains("4:1 warning: unused variable"));
        assert!(!out.contains("b.ts"));

        assert_eq!(render_diagnostics(root, &[]), "No diagnostics found.");
    }

    #[test]
    fn symbol_tree_is_indented_with_kind_tags() {
        let child = SymbolNode {
            name: "greet".into(),
            kind: 6,
            range: range(1, 2, 3, 3),
            selection_range: range(1, 2, 1, 7),
            detail: Some("(n: string): string".into()),
            deprecated: true,
            container: None,
            children: Vec::new(),
        };
        let root_sym = SymbolNode {
            name: "Greeter".into(),
            kind: 5,
            range: range(0, 0, 10, 1),
            selection_range: range(0, 6, 0, 13),
            detail: None,
            deprecated: false,
            container: None,
            children: vec![child],
        };

        let out = render_symbol_tree("a.ts", &[root_sym]);
        assert!(out.contains("  Greeter [Class] @ 1:7"));
        assert!(out.contains("    greet [Method] @ 2:3 (deprecated) - (n: string): string"));
    }

    #[test]
    fn signature_help_points_at_the_active_parameter() {
        let value = json!({
            "signatures": [{
                "label": "greet(name: string, loud: boolean): string",
                "parameters": [
                    { "label": "name: string" },
                    { "label": "loud: boolean" }
                ]
            }],
            "activeSignature": 0,
            "activeParameter": 1
        });

        let out = render_signature_help(&value).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "greet(name: string, loud: boolean): string");
        assert!(lines[1].contains("^^^^^^^^^^^^^"));
        assert!(lines[1].contains("← active parameter: loud: boolean"));

        let caret_start = lines[1].find('^').unwrap();
        assert_eq!(caret_start, lines[0].find("loud").unwrap());
    }

    #[test]
    fn signature_help_supports_offset_labels() {
        let value = json!({
            "signatures": [{
                "label": "add(a: i32, b: i32)",
                "parameters": [
                    { "label": [4, 10] },
                    { "label": [12, 18] }
                ]
            }],
            "activeParameter": 0
        });
        let out = render_signature_help(&value).unwrap();
        assert!(out.contains("← active parameter: a: i32"));
    }

    #[test]
    fn change_summaries_render_old_to_new_pairs() {
        let root = Path::new("/project");
        let changes = vec![FileChanges {
            path: PathBuf::from("/project/src/a.ts"),
            summaries: vec![lsb_core::text_edit::ChangeSummary {
                line: 0,
                character: 16,
                old_text: "greet".into(),
                new_text: "hello".into(),
            }],
        }];

        let out = render_change_summaries(root, "Renamed \"greet\" to \"hello\"", &changes);
        assert!(out.contains("1 file changed"));
        assert!(out.contains("src/a.ts (1 change):"));
        assert!(out.contains("1:17 \"greet\" → \"hello\""));
    }

    #[test]
    fn truncation_appends_a_marker() {
        let text = "x".repeat(200);
        let out = truncate_output(text.clone(), 100);
        assert!(out.len() < 200);
        assert!(out.ends_with("... (output truncated)"));
        assert_eq!(truncate_output(text.clone(), 300), text);
    }

    #[test]
    fn completions_respect_the_limit() {
        let items: Vec<Value> = (0..10)
            .map(|i| json!({ "label": format!("item{i}"), "detail": "d" }))
            .collect();
        let out = render_completions(&json!({ "items": items }), 3);
        assert!(out.contains("10 completions (showing 3):"));
        assert!(out.contains("item0"));
        assert!(!out.contains("item5"));
    }
}
