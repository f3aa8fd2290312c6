use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use lsb_core::error::{BrokerError, Result};

use crate::client::LspClient;
use crate::proto::{self, TextDocumentItem};

/// Tracks which documents are open on one server and their versions.
///
/// The session enforces the document lifecycle: a document cannot be opened
/// twice without an intervening close, and `update` on an unopened document
/// is rejected. All didOpen/didChange/didClose notifications for a document
/// flow through the client's single writer, so their order is preserved.
pub struct DocumentSession {
    client: Arc<LspClient>,
    versions: Mutex<HashMap<String, i32>>,
}

impl DocumentSession {
    pub fn new(client: Arc<LspClient>) -> Self {
        Self {
            client,
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<LspClient> {
        &self.client
    }

    pub async fn open(&self, path: &Path, text: &str, language_id: &str) -> Result<()> {
        let uri = proto::path_to_uri(path)?;
        {
            let mut versions = self.versions.lock().await;
            if versions.contains_key(&uri) {
                return Err(BrokerError::InvalidArgument(format!(
                    "document is already open: {uri}"
                )));
            }
            versions.insert(uri.clone(), 1);
        }

        self.client.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": TextDocumentItem {
                    uri,
                    language_id: language_id.to_string(),
                    version: 1,
                    text: text.to_string(),
                }
            }),
        )
    }

    /// Full-text didChange with a strictly increasing version.
    pub async fn update(&self, path: &Path, text: &str) -> Result<()> {
        let uri = proto::path_to_uri(path)?;
        let version = {
            let mut versions = self.versions.lock().await;
            let Some(version) = versions.get_mut(&uri) else {
                return Err(BrokerError::InvalidArgument(format!(
                    "document is not open: {uri}"
                )));
            };
            *version += 1;
            *version
        };

        self.client.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [{ "text": text }]
            }),
        )
    }

    pub async fn close(&self, path: &Path) -> Result<()> {
        let uri = proto::path_to_uri(path)?;
        {
            let mut versions = self.versions.lock().await;
            if versions.remove(&uri).is_none() {
                return Err(BrokerError::InvalidArgument(format!(
                    "document is not open: {uri}"
                )));
            }
        }

        self.client
            .notify("textDocument/didClose", json!({
                "textDocument": { "uri": uri }
            }))?;
        self.client.diagnostics().clear(&uri).await;
        Ok(())
    }

    pub async fn is_open(&self, path: &Path) -> bool {
        let Ok(uri) = proto::path_to_uri(path) else {
            return false;
        };
        self.versions.lock().await.contains_key(&uri)
    }

    pub async fn version(&self, path: &Path) -> Option<i32> {
        let uri = proto::path_to_uri(path).ok()?;
        self.versions.lock().await.get(&uri).copied()
    }

    /// Open `path` if it is not already open, run `op`, and close the
    /// document again iff this call opened it. Cleanup runs on success and
    /// on failure; this is the canonical shape for short-lived analyses.
    pub async fn with_temporary_document<F, Fut, T>(
        &self,
        path: &Path,
        text: &str,
        language_id: &str,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let opened_here = if self.is_open(path).await {
            false
        } else {
            self.open(path, text, language_id).await?;
            true
        };

        let result = op().await;

        if opened_here && let Err(close_err) = self.close(path).await {
            warn!("failed to close temporary document {}: {close_err}", path.display());
        }

        result
    }
}
