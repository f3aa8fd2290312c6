use std::path::Path;

use serde_json::Value;

use lsb_core::error::{BrokerError, Result};
use lsb_index::SymbolQuery;
use lsb_lsp::proto::Location;
use lsb_lsp::symbol::{parse_document_symbols, parse_symbol_kind};

use crate::BrokerServer;
use crate::args::{GetDocumentSymbolsArgs, GetWorkspaceSymbolsArgs, SearchSymbolsArgs};
use crate::render;
use crate::resolve::{canonicalize_within, display_path};

impl BrokerServer {
    pub(crate) async fn get_document_symbols(&self, args: GetDocumentSymbolsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let file = canonicalize_within(&root, Path::new(&args.file_path))?;

        let op_file = file.clone();
        let label = display_path(&root, &file);
        orchestrator
            .with_document(&root, &file, move |entry, _text| async move {
                let value = entry.client().document_symbols(&op_file).await?;
                let nodes = parse_document_symbols(value)
                    .map_err(|e| BrokerError::Transport(format!("malformed response: {e:#}")))?;
                Ok(render::render_symbol_tree(&label, &nodes))
            })
            .await
    }

    pub(crate) async fn get_workspace_symbols(&self, args: GetWorkspaceSymbolsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let language = orchestrator.project_language(&root);

        let handle = orchestrator.acquire(&root, &language).await?;
        let result = handle.client().workspace_symbols(&args.query).await;
        handle.release().await;

        let mut entries = parse_workspace_symbol_matches(result?);
        entries.sort_by(|a, b| {
            (a.2.uri.as_str(), a.2.range.start.line).cmp(&(b.2.uri.as_str(), b.2.range.start.line))
        });
        Ok(render::render_grouped_symbols(&root, &entries))
    }

    pub(crate) async fn search_symbols(&self, args: SearchSymbolsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;
        let index = self.ensure_index(&root).await?;

        let file = match args.file.as_deref() {
            Some(file) => {
                let file = canonicalize_within(&root, Path::new(file))?;
                // Make sure the named file is queryable even if background
                // indexing has not reached it yet; the cache keeps this
                // cheap when nothing changed.
                index
                    .index_file(&file)
                    .await
                    .map_err(|e| BrokerError::Transport(format!("indexing failed: {e:#}")))?;
                Some(file)
            }
            None => None,
        };

        let mut kinds = Vec::new();
        if let Some(kind) = args.kind {
            for name in kind.into_vec() {
                let parsed = parse_symbol_kind(&name).ok_or_else(|| {
                    BrokerError::InvalidArgument(format!("unknown symbol kind: {name}"))
                })?;
                kinds.push(parsed);
            }
        }

        let query = SymbolQuery {
            name: args.name,
            kinds,
            container: args.container_name,
            file,
            include_children: args.include_children.unwrap_or(true),
            include_external: args.include_external.unwrap_or(false),
            only_external: args.only_external,
            source_library: args.source_library,
        };

        let results = index.query(&query);
        Ok(render::render_search_results(&root, &results))
    }
}

/// `workspace/symbol` answers SymbolInformation[] or WorkspaceSymbol[];
/// both carry name, kind, and a location.
fn parse_workspace_symbol_matches(value: Value) -> Vec<(String, u32, Location)> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(kind) = item.get("kind").and_then(|v| v.as_u64()) else {
            continue;
        };
        let Some(location) = item
            .get("location")
            .and_then(|l| serde_json::from_value::<Location>(l.clone()).ok())
        else {
            continue;
        };
        out.push((name.to_string(), kind as u32, location));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workspace_symbol_parsing_skips_malformed_items() {
        let value = json!([
            {
                "name": "greet",
                "kind": 12,
                "location": {
                    "uri": "file:///a.ts",
                    "range": { "start": { "line": 0, "character": 0 },
                               "end": { "line": 0, "character": 5 } }
                }
            },
            { "name": "no-kind" },
            42
        ]);
        let parsed = parse_workspace_symbol_matches(value);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "greet");
    }

    #[test]
    fn null_workspace_symbols_parse_to_empty() {
        assert!(parse_workspace_symbol_matches(Value::Null).is_empty());
    }

    mod with_scripted_server {
        use crate::BrokerServer;
        use crate::args::{GetDocumentSymbolsArgs, SearchSymbolsArgs};
        use crate::session::Orchestrator;
        use crate::session::test_pool::{Script, fast_config, scripted_pool};
        use serde_json::json;
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex as StdMutex};

        fn greet_symbols() -> serde_json::Value {
            json!([{
                "name": "greet",
                "kind": 12,
                "range": { "start": { "line": 0, "character": 0 },
                           "end": { "line": 0, "character": 48 } },
                "selectionRange": { "start": { "line": 0, "character": 16 },
                                    "end": { "line": 0, "character": 21 } }
            }])
        }

        #[tokio::test]
        async fn search_symbols_answers_from_the_index() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            tokio::fs::write(
                root.join("a.ts"),
                "export function greet(n: string){ return 'h'+n }",
            )
            .await
            .unwrap();

            let script: Script = Arc::new(StdMutex::new(HashMap::new()));
            script
                .lock()
                .unwrap()
                .insert("textDocument/documentSymbol".to_string(), greet_symbols());

            let server = BrokerServer::from_orchestrator(Orchestrator::new(
                fast_config(),
                root,
                scripted_pool(script),
                None,
                None,
            ));

            let out = server
                .search_symbols(SearchSymbolsArgs {
                    name: Some("greet".into()),
                    file: Some("a.ts".into()),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert!(out.contains("greet [Function]"), "got: {out}");
            assert!(out.contains("a.ts:1:1"), "got: {out}");
        }

        #[tokio::test]
        async fn document_symbols_render_as_a_tree() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            tokio::fs::write(
                root.join("a.ts"),
                "export function greet(n: string){ return 'h'+n }",
            )
            .await
            .unwrap();

            let script: Script = Arc::new(StdMutex::new(HashMap::new()));
            script
                .lock()
                .unwrap()
                .insert("textDocument/documentSymbol".to_string(), greet_symbols());

            let server = BrokerServer::from_orchestrator(Orchestrator::new(
                fast_config(),
                root,
                scripted_pool(script),
                None,
                None,
            ));

            let out = server
                .get_document_symbols(GetDocumentSymbolsArgs {
                    root: None,
                    file_path: "a.ts".into(),
                })
                .await
                .unwrap();
            assert!(out.contains("Symbols in a.ts:"), "got: {out}");
            assert!(out.contains("greet [Function] @ 1:17"), "got: {out}");
        }
    }
}
