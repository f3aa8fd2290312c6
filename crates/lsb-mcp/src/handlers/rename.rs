use std::collections::{HashMap, HashSet};
use std::path::Path;

use lsb_core::error::{BrokerError, Result};
use lsb_core::text_edit::{Position, Range, TextEdit};
use lsb_lsp::capabilities::capability_enabled;
use lsb_lsp::proto::collect_locations;
use lsb_lsp::symbol::{SymbolNode, parse_document_symbols};
use lsb_lsp::{path_to_uri, uri_to_path};

use crate::BrokerServer;
use crate::args::{DeleteSymbolArgs, RenameSymbolArgs};
use crate::render;
use crate::resolve::{
    LineSelector, canonicalize_within, find_symbol_on_line, position_from_args, resolve_line,
    utf16_len,
};
use crate::workspace_edit::apply_workspace_edit;

impl BrokerServer {
    pub(crate) async fn rename_symbol(&self, args: RenameSymbolArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let op_root = root.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                // Without a line argument the target substring selects one.
                let selector = args
                    .line
                    .clone()
                    .unwrap_or_else(|| LineSelector::Substring(args.target.clone()));
                let position = position_from_args(
                    &text,
                    &args.file_path,
                    &selector,
                    None,
                    Some(&args.target),
                )?;

                if !capability_enabled(entry.client().server_capabilities(), "renameProvider") {
                    return Err(BrokerError::Unsupported(
                        "language server doesn't support rename".into(),
                    ));
                }

                let edit = match entry
                    .client()
                    .rename(&op_file, position, &args.new_name)
                    .await
                {
                    Ok(value) => value,
                    Err(BrokerError::Unsupported(_)) => {
                        return Err(BrokerError::Unsupported(
                            "language server doesn't support rename".into(),
                        ));
                    }
                    Err(err) => return Err(err),
                };
                if edit.is_null() {
                    return Ok(format!(
                        "Rename of \"{}\" produced no edits.",
                        args.target
                    ));
                }

                let changes = lsb_lsp::proto::normalize_workspace_edit(edit)?;
                let applied = apply_workspace_edit(&op_root, &changes).await?;
                Ok(render::render_change_summaries(
                    &op_root,
                    &format!("Renamed \"{}\" to \"{}\"", args.target, args.new_name),
                    &applied,
                ))
            })
            .await
    }

    pub(crate) async fn delete_symbol(&self, args: DeleteSymbolArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let op_root = root.clone();
        orchestrator
            .with_document(&root, &file, move |entry, text| async move {
                let line = resolve_line(&text, &args.line, &args.file_path)?;
                let character = find_symbol_on_line(&text, line, &args.symbol_name)?;
                let position = Position { line, character };

                let symbols = entry.client().document_symbols(&op_file).await?;
                let nodes = parse_document_symbols(symbols)
                    .map_err(|e| BrokerError::Transport(format!("malformed response: {e:#}")))?;
                let node = deepest_containing(&nodes, position).ok_or_else(|| {
                    BrokerError::SymbolNotFoundOnLine {
                        symbol: args.symbol_name.clone(),
                        line: line + 1,
                    }
                })?;

                let uri = path_to_uri(&op_file)?;
                let mut changes: HashMap<String, Vec<TextEdit>> = HashMap::new();
                changes
                    .entry(uri.clone())
                    .or_default()
                    .push(whole_line_deletion(&text, node.range));

                if args.remove_references {
                    let value = entry.client().references(&op_file, position, false).await?;
                    let references = collect_locations(value).map_err(|e| {
                        BrokerError::Transport(format!("malformed response: {e:#}"))
                    })?;

                    let mut seen: HashSet<(String, u32)> = HashSet::new();
                    for reference in references {
                        let ref_line = reference.range.start.line;
                        // The definition's own lines are already going away.
                        if reference.uri == uri
                            && ref_line >= node.range.start.line
                            && ref_line <= node.range.end.line
                        {
                            continue;
                        }
                        if !seen.insert((reference.uri.clone(), ref_line)) {
                            continue;
                        }
                        let Ok(ref_path) = uri_to_path(&reference.uri) else {
                            continue;
                        };
                        let Ok(ref_text) = std::fs::read_to_string(&ref_path) else {
                            continue;
                        };
                        let line_range = Range {
                            start: Position {
                                line: ref_line,
                                character: 0,
                            },
                            end: Position {
                                line: ref_line,
                                character: utf16_len(
                                    ref_text.lines().nth(ref_line as usize).unwrap_or(""),
                                ),
                            },
                        };
                        changes.entry(reference.uri).or_default().push(TextEdit {
                            range: line_range,
                            new_text: String::new(),
                        });
                    }
                }

                let applied = apply_workspace_edit(&op_root, &changes).await?;
                let mut out = format!(
                    "Removed \"{}\" from {} file{}:\n",
                    args.symbol_name,
                    applied.len(),
                    if applied.len() == 1 { "" } else { "s" }
                );
                for change in &applied {
                    out.push_str(&format!(
                        "  {}\n",
                        crate::resolve::display_path(&op_root, &change.path)
                    ));
                }
                Ok(out)
            })
            .await
    }
}

fn whole_line_deletion(text: &str, range: Range) -> TextEdit {
    let end_line_text = text.lines().nth(range.end.line as usize).unwrap_or("");
    TextEdit {
        range: Range {
            start: Position {
                line: range.start.line,
                character: 0,
            },
            end: Position {
                line: range.end.line,
                character: utf16_len(end_line_text),
            },
        },
        new_text: String::new(),
    }
}

fn deepest_containing(nodes: &[SymbolNode], position: Position) -> Option<&SymbolNode> {
    for node in nodes {
        let after_start = (position.line, position.character)
            >= (node.range.start.line, node.range.start.character);
        let before_end =
            (position.line, position.character) <= (node.range.end.line, node.range.end.character);
        if after_start && before_end {
            return deepest_containing(&node.children, position).or(Some(node));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrokerServer;
    use crate::session::Orchestrator;
    use crate::session::test_pool::{Script, fast_config, rpc_error, scripted_pool};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex as StdMutex};

    fn broker(script: Script, root: PathBuf) -> BrokerServer {
        BrokerServer::from_orchestrator(Orchestrator::new(
            fast_config(),
            root,
            scripted_pool(script),
            None,
            None,
        ))
    }

    fn text_edit(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> serde_json::Value {
        json!({
            "range": { "start": { "line": sl, "character": sc },
                       "end": { "line": el, "character": ec } },
            "newText": text
        })
    }

    #[tokio::test]
    async fn rename_applies_server_edits_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a.ts");
        let b = root.join("b.ts");
        tokio::fs::write(&a, "export function greet(n: string){ return 'h'+n }")
            .await
            .unwrap();
        tokio::fs::write(&b, "import {greet} from './a'; greet('w')")
            .await
            .unwrap();

        let uri_a = path_to_uri(&a).unwrap();
        let uri_b = path_to_uri(&b).unwrap();
        let script: Script = Arc::new(StdMutex::new(HashMap::new()));
        script.lock().unwrap().insert(
            "textDocument/rename".to_string(),
            json!({
                "changes": {
                    uri_a: [text_edit(0, 16, 0, 21, "hello")],
                    uri_b: [
                        text_edit(0, 8, 0, 13, "hello"),
                        text_edit(0, 27, 0, 32, "hello")
                    ]
                }
            }),
        );

        let server = broker(script, root.clone());
        let out = server
            .rename_symbol(crate::args::RenameSymbolArgs {
                root: None,
                file_path: "a.ts".into(),
                line: Some(LineSelector::Number(1)),
                target: "greet".into(),
                new_name: "hello".into(),
            })
            .await
            .unwrap();

        assert!(out.contains("2 files changed"), "got: {out}");
        assert!(out.contains("\"greet\" → \"hello\""), "got: {out}");
        assert_eq!(
            tokio::fs::read_to_string(&a).await.unwrap(),
            "export function hello(n: string){ return 'h'+n }"
        );
        assert_eq!(
            tokio::fs::read_to_string(&b).await.unwrap(),
            "import {hello} from './a'; hello('w')"
        );
    }

    #[tokio::test]
    async fn unsupported_rename_reports_and_modifies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a.ts");
        let original = "export function greet(n: string){ return 'h'+n }";
        tokio::fs::write(&a, original).await.unwrap();

        let script: Script = Arc::new(StdMutex::new(HashMap::new()));
        script.lock().unwrap().insert(
            "textDocument/rename".to_string(),
            rpc_error(-32601, "method not found"),
        );

        let server = broker(script, root.clone());
        let err = server
            .rename_symbol(crate::args::RenameSymbolArgs {
                root: None,
                file_path: "a.ts".into(),
                line: None,
                target: "greet".into(),
                new_name: "hello".into(),
            })
            .await
            .unwrap_err();

        match err {
            BrokerError::Unsupported(message) => {
                assert!(message.contains("doesn't support rename"), "got: {message}");
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
        assert_eq!(tokio::fs::read_to_string(&a).await.unwrap(), original);
    }

    #[tokio::test]
    async fn delete_symbol_removes_definition_lines() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a.ts");
        tokio::fs::write(&a, "function unused() {\n  return 1;\n}\nkeep();\n")
            .await
            .unwrap();

        let script: Script = Arc::new(StdMutex::new(HashMap::new()));
        script.lock().unwrap().insert(
            "textDocument/documentSymbol".to_string(),
            json!([{
                "name": "unused",
                "kind": 12,
                "range": { "start": { "line": 0, "character": 0 },
                           "end": { "line": 2, "character": 1 } },
                "selectionRange": { "start": { "line": 0, "character": 9 },
                                    "end": { "line": 0, "character": 15 } }
            }]),
        );

        let server = broker(script, root.clone());
        let out = server
            .delete_symbol(crate::args::DeleteSymbolArgs {
                root: None,
                file_path: "a.ts".into(),
                line: LineSelector::Number(1),
                symbol_name: "unused".into(),
                remove_references: false,
            })
            .await
            .unwrap();

        assert!(out.contains("Removed \"unused\" from 1 file"), "got: {out}");
        assert_eq!(tokio::fs::read_to_string(&a).await.unwrap(), "keep();\n");
    }
}
