use std::path::{Path, PathBuf};

use tokio::time::Duration;

use lsb_core::error::{BrokerError, Result};
use lsb_lsp::path_to_uri;
use lsb_lsp::proto::Diagnostic;

use crate::BrokerServer;
use crate::args::GetDiagnosticsArgs;
use crate::render;
use crate::resolve::canonicalize_within;

/// How long a freshly opened document may take to produce its first
/// `publishDiagnostics` before falling back to pull diagnostics.
const PUBLISH_WAIT: Duration = Duration::from_secs(2);

impl BrokerServer {
    pub(crate) async fn get_diagnostics(&self, args: GetDiagnosticsArgs) -> Result<String> {
        let orchestrator = self.orchestrator();
        let root = orchestrator.resolve_root(args.root.as_deref())?;

        let files: Vec<PathBuf> = if !args.file_paths.is_empty() {
            args.file_paths
                .iter()
                .map(|p| canonicalize_within(&root, Path::new(p)))
                .collect::<Result<_>>()?
        } else if let Some(pattern) = args.pattern.as_deref() {
            crate::collect_files_matching(&root, pattern)?
        } else {
            return Err(BrokerError::InvalidArgument(
                "provide filePaths or a pattern".into(),
            ));
        };

        let mut per_file: Vec<(PathBuf, Vec<Diagnostic>)> = Vec::with_capacity(files.len());
        for file in files {
            let diagnostics = self.diagnostics_for(&root, &file).await?;
            per_file.push((file, diagnostics));
        }

        Ok(render::render_diagnostics(&root, &per_file))
    }

    /// Open the file (which triggers a fresh publish for the current disk
    /// contents), wait briefly for it, and fall back to pull diagnostics.
    pub async fn diagnostics_for(&self, root: &Path, file: &Path) -> Result<Vec<Diagnostic>> {
        let orchestrator = self.orchestrator();
        let op_file = file.to_path_buf();
        orchestrator
            .with_document(root, file, move |entry, _text| async move {
                let uri = path_to_uri(&op_file)?;
                let store = entry.client().diagnostics();
                if let Some(snapshot) = store.snapshot(&uri).await {
                    // Published while the document settled; the session
                    // cleared any previous state on close, so this is fresh.
                    return Ok(snapshot);
                }
                match store.wait_for(&uri, PUBLISH_WAIT).await {
                    Ok(diagnostics) => Ok(diagnostics),
                    Err(BrokerError::Timeout { .. }) => {
                        entry.client().pull_diagnostics(&op_file).await
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrokerServer;
    use crate::args::GetDiagnosticsArgs;
    use crate::session::Orchestrator;
    use crate::session::test_pool::{Script, fast_config, scripted_pool};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    fn publish(uri: &str, diagnostics: serde_json::Value) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics }
        })
    }

    #[tokio::test]
    async fn diagnostics_track_the_latest_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let file = root.join("a.ts");
        tokio::fs::write(&file, "const x: string = 123;").await.unwrap();
        let uri = path_to_uri(&file).unwrap();

        let script: Script = Arc::new(StdMutex::new(HashMap::new()));
        script.lock().unwrap().insert(
            "__notify:textDocument/didOpen".to_string(),
            publish(
                &uri,
                json!([{
                    "range": { "start": { "line": 0, "character": 6 },
                               "end": { "line": 0, "character": 7 } },
                    "severity": 1,
                    "message": "Type 'number' is not assignable to type 'string'."
                }]),
            ),
        );

        let server = BrokerServer::from_orchestrator(Orchestrator::new(
            fast_config(),
            root.clone(),
            scripted_pool(script.clone()),
            None,
            None,
        ));

        let out = server
            .get_diagnostics(GetDiagnosticsArgs {
                root: None,
                file_paths: vec!["a.ts".into()],
                pattern: None,
            })
            .await
            .unwrap();
        assert!(out.contains("1 diagnostic (1 error, 0 warnings)"), "got: {out}");
        assert!(out.contains("a.ts (1 issue):"), "got: {out}");
        assert!(out.contains("1:7 error:"), "got: {out}");

        // The fix lands on disk; the next request reflects it.
        tokio::fs::write(&file, "const x: string = \"ok\";")
            .await
            .unwrap();
        script.lock().unwrap().insert(
            "__notify:textDocument/didOpen".to_string(),
            publish(&uri, json!([])),
        );

        let out = server
            .get_diagnostics(GetDiagnosticsArgs {
                root: None,
                file_paths: vec!["a.ts".into()],
                pattern: None,
            })
            .await
            .unwrap();
        assert_eq!(out, "No diagnostics found.");
    }

    #[tokio::test]
    async fn missing_arguments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let server = BrokerServer::from_orchestrator(Orchestrator::new(
            fast_config(),
            root,
            scripted_pool(Arc::new(StdMutex::new(HashMap::new()))),
            None,
            None,
        ));

        let err = server
            .get_diagnostics(GetDiagnosticsArgs {
                root: None,
                file_paths: vec![],
                pattern: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
    }
}
