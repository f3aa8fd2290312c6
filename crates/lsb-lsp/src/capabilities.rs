use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::time::Duration;
use tracing::{debug, warn};

use lsb_core::config::ResolvedServer;
use lsb_core::error::Result;
use lsb_core::lang;

use crate::client::LspClient;
use crate::documents::DocumentSession;

/// The static capability set this client declares. Servers negotiate down
/// from here; anything the broker relies on at runtime is listed.
pub fn client_capabilities() -> Value {
    json!({
        "workspace": {
            "workspaceFolders": true,
            "configuration": true,
            "applyEdit": true,
            "workspaceEdit": { "documentChanges": true },
            "symbol": { "hierarchicalWorkspaceSymbolSupport": true }
        },
        "textDocument": {
            "synchronization": {
                "didSave": true,
                "dynamicRegistration": false
            },
            "publishDiagnostics": { "relatedInformation": true },
            "definition": { "linkSupport": true },
            "hover": { "contentFormat": ["markdown", "plaintext"] },
            "completion": {
                "completionItem": { "snippetSupport": true }
            },
            "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
            "signatureHelp": {
                "signatureInformation": { "parameterInformation": { "labelOffsetSupport": true } }
            }
        },
        "window": { "workDoneProgress": true }
    })
}

/// Run the `initialize`/`initialized` handshake and record the negotiated
/// server capabilities on the client.
pub async fn initialize(client: &Arc<LspClient>, root: &Path, server: &ResolvedServer) -> Result<()> {
    let root_uri = client.root_uri().to_string();
    let mut params = json!({
        "processId": std::process::id(),
        "rootPath": root.to_string_lossy(),
        "rootUri": root_uri,
        "capabilities": client_capabilities(),
        "workspaceFolders": [
            { "uri": root_uri, "name": "workspace" }
        ]
    });
    if let Some(options) = server.initialize_options.as_ref()
        && let Some(obj) = params.as_object_mut()
    {
        obj.insert("initializationOptions".to_string(), options.clone());
    }

    let result = client
        .request("initialize", params, Some(server.initialize_timeout))
        .await?;
    client.record_capabilities(result.get("capabilities").cloned().unwrap_or(Value::Null));
    client.notify("initialized", json!({}))?;
    Ok(())
}

/// Per-language post-initialization hook.
///
/// tsserver-family servers load projects lazily, so key project files are
/// pre-opened; rust-analyzer stays quiet until its crate graph is built, so
/// the first `publishDiagnostics` is awaited as the readiness signal.
pub async fn warm_up(session: &DocumentSession, root: &Path, server: &ResolvedServer) {
    if server.preopen_project_files {
        for name in lang::preopen_candidates(&server.language) {
            let path = root.join(name);
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if let Err(err) = session.open(&path, &text, "json").await {
                debug!("could not pre-open {}: {err}", path.display());
            }
        }
    }

    if server.wait_for_first_diagnostics {
        let ready = session
            .client()
            .diagnostics()
            .wait_for_first_publish(server.initialize_timeout)
            .await;
        if !ready {
            warn!(
                "no diagnostics within {:?} after initialize; proceeding anyway",
                server.initialize_timeout
            );
        }
    }
}

/// True when a server capability is present and not disabled. Capabilities
/// may be a bare `true` or an options object.
pub fn capability_enabled(capabilities: Option<&Value>, key: &str) -> bool {
    let Some(value) = capabilities.and_then(|caps| caps.get(key)) else {
        return false;
    };
    !matches!(value, Value::Bool(false) | Value::Null)
}

/// Grace interval between `exit` and killing the process.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
