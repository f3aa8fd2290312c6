use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info};

use lsb_core::config;
use lsb_core::error::{BrokerError, Result};
use lsb_core::lang;
use lsb_index::index::BoxFuture;
use lsb_index::{IndexWatcher, SymbolCache, SymbolIndex, SymbolSource};
use lsb_lsp::pool::ServerPool;
use lsb_lsp::symbol::{SymbolNode, parse_document_symbols};

mod args;
mod handlers;
pub mod render;
pub mod resolve;
pub mod session;
mod tool_schemas;
pub mod workspace_edit;

pub use session::Orchestrator;

#[derive(Debug, Clone, Default)]
pub struct McpOptions {
    pub config_path: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
    /// Explicit language selector; wins over file-extension inference.
    pub language: Option<String>,
    /// Full server command line override, e.g. `"deno lsp"`.
    pub server_command: Option<String>,
}

/// Serve the tool protocol over stdio until the peer disconnects.
pub async fn run_stdio(options: McpOptions) -> anyhow::Result<()> {
    let service = BrokerServer::new(options)?;
    let running = service
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    running.waiting().await?;
    Ok(())
}

struct ProjectIndex {
    index: Arc<SymbolIndex>,
    // Held so the notify debouncer keeps running for the index's lifetime.
    #[allow(dead_code)]
    watcher: Arc<IndexWatcher>,
}

struct BrokerState {
    orchestrator: Arc<Orchestrator>,
    indices: Mutex<HashMap<PathBuf, ProjectIndex>>,
    max_output_chars: usize,
}

#[derive(Clone)]
pub struct BrokerServer {
    tools: Arc<Vec<Tool>>,
    state: Arc<BrokerState>,
}

impl BrokerServer {
    pub fn new(options: McpOptions) -> anyhow::Result<Self> {
        let loaded = config::load_config(
            options.config_path.as_deref(),
            options.workspace_root.as_deref(),
        )?;
        info!(
            "workspace root: {} (config: {:?})",
            loaded.workspace_root.display(),
            loaded.source
        );
        let pool = ServerPool::with_process_launcher();
        Ok(Self::from_orchestrator(Orchestrator::new(
            loaded.config,
            loaded.workspace_root,
            pool,
            options.language,
            options.server_command,
        )))
    }

    /// Build a server around an existing orchestrator; tests and the CLI's
    /// batch mode come in through here.
    pub fn from_orchestrator(orchestrator: Orchestrator) -> Self {
        let max_output_chars = orchestrator
            .config()
            .output
            .as_ref()
            .and_then(|o| o.max_chars)
            .unwrap_or(render::DEFAULT_MAX_OUTPUT_CHARS);
        Self {
            tools: Arc::new(tool_schemas::all_tools()),
            state: Arc::new(BrokerState {
                orchestrator: Arc::new(orchestrator),
                indices: Mutex::new(HashMap::new()),
                max_output_chars,
            }),
        }
    }

    pub(crate) fn orchestrator(&self) -> Arc<Orchestrator> {
        self.state.orchestrator.clone()
    }

    pub async fn shutdown(&self) {
        self.state.orchestrator.pool().shutdown_all().await;
    }

    /// Symbol index for a project root, created on first use. Creation
    /// kicks off a background walk that indexes and watches the project's
    /// source files.
    pub(crate) async fn ensure_index(&self, root: &Path) -> Result<Arc<SymbolIndex>> {
        let root = root
            .canonicalize()
            .map_err(|_| BrokerError::FileNotFound(root.to_path_buf()))?;

        let mut indices = self.state.indices.lock().await;
        if let Some(project) = indices.get(&root) {
            return Ok(project.index.clone());
        }

        let index_config = self.state.orchestrator.config().index.clone().unwrap_or_default();
        let cache = SymbolCache::open(&root, index_config.cache_capacity);
        let source = Arc::new(PoolSymbolSource {
            orchestrator: self.state.orchestrator.clone(),
            root: root.clone(),
        });
        let index = SymbolIndex::new(root.clone(), cache, source);
        let debounce =
            Duration::from_millis(index_config.reindex_debounce_ms.unwrap_or(200).max(10));
        let watcher = IndexWatcher::spawn(index.clone(), debounce)
            .map_err(|e| BrokerError::Transport(format!("failed to start watcher: {e:#}")))?;

        spawn_background_indexing(index.clone(), watcher.clone(), root.clone());
        indices.insert(root, ProjectIndex {
            index: index.clone(),
            watcher,
        });
        Ok(index)
    }
}

/// Production symbol source: document symbols via a pooled server, with
/// the usual open → settle → operate → close lifecycle.
struct PoolSymbolSource {
    orchestrator: Arc<Orchestrator>,
    root: PathBuf,
}

impl SymbolSource for PoolSymbolSource {
    fn document_symbols<'a>(
        &'a self,
        path: &'a Path,
        text: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Vec<SymbolNode>>> {
        Box::pin(async move {
            let language = self.orchestrator.language_for(path);
            let handle = self.orchestrator.acquire(&self.root, &language).await?;
            let entry = handle.entry().clone();
            let op_entry = entry.clone();
            let result = entry
                .session()
                .with_temporary_document(path, text, &language, move || async move {
                    op_entry.settle_after_first_open().await;
                    op_entry.client().document_symbols(path).await
                })
                .await;
            handle.release().await;
            Ok(parse_document_symbols(result?)?)
        })
    }
}

const BACKGROUND_INDEX_LIMIT: usize = 2_000;
const PATTERN_MATCH_LIMIT: usize = 500;
const SKIPPED_DIRS: [&str; 7] = [
    ".git",
    ".hg",
    ".lsmcp",
    "node_modules",
    "target",
    "dist",
    "build",
];

fn spawn_background_indexing(index: Arc<SymbolIndex>, watcher: Arc<IndexWatcher>, root: PathBuf) {
    tokio::spawn(async move {
        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || {
            collect_source_files(&walk_root, BACKGROUND_INDEX_LIMIT)
        })
        .await
        .unwrap_or_default();

        info!(
            "background indexing {} files under {}",
            files.len(),
            root.display()
        );
        for file in files {
            if index.index_file(&file).await.is_ok()
                && let Err(err) = watcher.watch(&file)
            {
                debug!("could not watch {}: {err:#}", file.display());
            }
        }
    });
}

fn collect_source_files(root: &Path, limit: usize) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
        });
    for entry in walker.flatten() {
        if out.len() >= limit {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if lang::language_id_for_path(&path) != "plaintext" {
            out.push(path);
        }
    }
    out.sort();
    out
}

/// Files under `root` matching a glob, for the batch diagnostics mode.
pub fn collect_files_matching(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = globset::GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|e| BrokerError::InvalidArgument(format!("invalid glob pattern: {e}")))?
        .compile_matcher();

    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
        });
    for entry in walker.flatten() {
        if out.len() >= PATTERN_MATCH_LIMIT {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let rel = path.strip_prefix(root).unwrap_or(&path);
        if matcher.is_match(rel) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn parse_arguments<T: DeserializeOwned>(arguments: Option<JsonObject>) -> Result<T> {
    let value = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value)
        .map_err(|e| BrokerError::InvalidArgument(format!("invalid tool arguments: {e}")))
}

/// Wrap a failure with call context before formatting, so callers see what
/// operation, file, symbol, and language were involved.
fn describe_error(tool: &str, raw_args: &JsonObject, err: &BrokerError) -> String {
    let mut context = Vec::new();
    if let Some(file) = raw_args.get("filePath").and_then(|v| v.as_str()) {
        context.push(format!("file={file}"));
        context.push(format!(
            "language={}",
            lang::language_id_for_path(Path::new(file))
        ));
    }
    for key in ["symbolName", "target", "name", "query"] {
        if let Some(symbol) = raw_args.get(key).and_then(|v| v.as_str()) {
            context.push(format!("symbol={symbol}"));
            break;
        }
    }
    if context.is_empty() {
        format!("{tool} failed: {err}")
    } else {
        format!("{tool} failed ({}): {err}", context.join(", "))
    }
}

impl ServerHandler for BrokerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: (*self.tools).clone(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let raw_args = request.arguments.clone().unwrap_or_default();
        let arguments = request.arguments;

        let outcome: Result<String> = match request.name.as_ref() {
            "get_hover" => match parse_arguments(arguments) {
                Ok(args) => self.get_hover(args).await,
                Err(err) => Err(err),
            },
            "get_definitions" => match parse_arguments(arguments) {
                Ok(args) => self.get_definitions(args).await,
                Err(err) => Err(err),
            },
            "find_references" => match parse_arguments(arguments) {
                Ok(args) => self.find_references(args).await,
                Err(err) => Err(err),
            },
            "get_diagnostics" => match parse_arguments(arguments) {
                Ok(args) => self.get_diagnostics(args).await,
                Err(err) => Err(err),
            },
            "rename_symbol" => match parse_arguments(arguments) {
                Ok(args) => self.rename_symbol(args).await,
                Err(err) => Err(err),
            },
            "delete_symbol" => match parse_arguments(arguments) {
                Ok(args) => self.delete_symbol(args).await,
                Err(err) => Err(err),
            },
            "get_document_symbols" => match parse_arguments(arguments) {
                Ok(args) => self.get_document_symbols(args).await,
                Err(err) => Err(err),
            },
            "get_workspace_symbols" => match parse_arguments(arguments) {
                Ok(args) => self.get_workspace_symbols(args).await,
                Err(err) => Err(err),
            },
            "get_completion" => match parse_arguments(arguments) {
                Ok(args) => self.get_completion(args).await,
                Err(err) => Err(err),
            },
            "get_signature_help" => match parse_arguments(arguments) {
                Ok(args) => self.get_signature_help(args).await,
                Err(err) => Err(err),
            },
            "get_code_actions" => match parse_arguments(arguments) {
                Ok(args) => self.get_code_actions(args).await,
                Err(err) => Err(err),
            },
            "format_document" | "format_range" => match parse_arguments(arguments) {
                Ok(args) => self.format_document(args).await,
                Err(err) => Err(err),
            },
            "search_symbols" => match parse_arguments(arguments) {
                Ok(args) => self.search_symbols(args).await,
                Err(err) => Err(err),
            },
            other => {
                return Err(McpError::invalid_params(
                    format!("unknown tool: {other}"),
                    None,
                ));
            }
        };

        match outcome {
            Ok(text) => Ok(CallToolResult {
                content: vec![Content::text(render::truncate_output(
                    text,
                    self.state.max_output_chars,
                ))],
                structured_content: None,
                is_error: Some(false),
                meta: None,
            }),
            Err(BrokerError::InvalidArgument(message)) => {
                Err(McpError::invalid_params(message, None))
            }
            Err(err) => Ok(CallToolResult {
                content: vec![Content::text(describe_error(
                    request.name.as_ref(),
                    &raw_args,
                    &err,
                ))],
                structured_content: None,
                is_error: Some(true),
                meta: None,
            }),
        }
    }
}
