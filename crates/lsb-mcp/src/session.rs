use std::path::{Path, PathBuf};
use std::sync::Arc;

use lsb_core::config::{self, BrokerConfig, ResolvedServer};
use lsb_core::error::{BrokerError, Result};
use lsb_core::lang;
use lsb_lsp::pool::{PoolHandle, ServerEntry, ServerPool};

/// Explicit per-workspace context threaded into every tool handler: the
/// loaded configuration, the server pool, and the CLI overrides.
pub struct Orchestrator {
    config: BrokerConfig,
    workspace_root: PathBuf,
    pool: Arc<ServerPool>,
    language_override: Option<String>,
    server_command_override: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: BrokerConfig,
        workspace_root: PathBuf,
        pool: Arc<ServerPool>,
        language_override: Option<String>,
        server_command_override: Option<String>,
    ) -> Self {
        Self {
            config,
            workspace_root,
            pool,
            language_override,
            server_command_override,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Project root for a tool call: the explicit argument, else the
    /// workspace root the broker was started in.
    pub fn resolve_root(&self, root_arg: Option<&str>) -> Result<PathBuf> {
        let root = match root_arg {
            Some(r) if !r.trim().is_empty() => {
                let path = PathBuf::from(r);
                if path.is_absolute() {
                    path
                } else {
                    self.workspace_root.join(path)
                }
            }
            _ => self.workspace_root.clone(),
        };
        root.canonicalize()
            .map_err(|_| BrokerError::FileNotFound(root))
    }

    /// The language a file is served by: the CLI selector or the
    /// `LSB_FORCE_LANGUAGE` environment override win over the extension.
    pub fn language_for(&self, path: &Path) -> String {
        if let Some(language) = self.language_override.as_deref() {
            return language.to_string();
        }
        if let Some(language) = config::forced_language() {
            return language;
        }
        lang::language_id_for_path(path).to_string()
    }

    /// Best-effort project language for tools without a file argument
    /// (workspace symbols): explicit overrides win, then project markers.
    pub fn project_language(&self, root: &Path) -> String {
        if let Some(language) = self.language_override.as_deref() {
            return language.to_string();
        }
        if let Some(language) = config::forced_language() {
            return language;
        }
        const MARKERS: [(&str, &str); 6] = [
            ("tsconfig.json", "typescript"),
            ("package.json", "typescript"),
            ("Cargo.toml", "rust"),
            ("go.mod", "go"),
            ("pyproject.toml", "python"),
            ("setup.py", "python"),
        ];
        for (marker, language) in MARKERS {
            if root.join(marker).exists() {
                return language.to_string();
            }
        }
        "plaintext".to_string()
    }

    pub fn resolved_server(&self, language: &str) -> Result<ResolvedServer> {
        config::resolve_server(
            &self.config,
            language,
            self.server_command_override.as_deref(),
        )
        .map_err(|e| BrokerError::Unsupported(e.to_string()))
    }

    pub async fn acquire(&self, root: &Path, language: &str) -> Result<PoolHandle> {
        let server = self.resolved_server(language)?;
        self.pool.acquire(root, server).await
    }

    /// The uniform tool lifecycle: acquire → open the document (transient)
    /// → settle on first open → run the operation → close → release. The
    /// pool handle releases on drop, so early failures cannot leak a
    /// reference, and transient documents close on both success and
    /// failure.
    pub async fn with_document<T, F, Fut>(&self, root: &Path, file: &Path, op: F) -> Result<T>
    where
        F: FnOnce(Arc<ServerEntry>, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let language = self.language_for(file);
        let handle = self.acquire(root, &language).await?;

        let text = match tokio::fs::read_to_string(file).await {
            Ok(text) => text,
            Err(_) => {
                handle.release().await;
                return Err(BrokerError::FileNotFound(file.to_path_buf()));
            }
        };

        let entry = handle.entry().clone();
        let op_entry = entry.clone();
        let op_text = text.clone();
        let result = entry
            .session()
            .with_temporary_document(file, &text, &language, move || async move {
                op_entry.settle_after_first_open().await;
                op(op_entry.clone(), op_text).await
            })
            .await;

        handle.release().await;
        result
    }
}
