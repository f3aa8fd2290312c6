use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use lsb_core::hashing::sha256_hex;
use lsb_lsp::proto::{Position, Range};
use lsb_lsp::{SymbolNode, path_to_uri};

use crate::cache::SymbolCache;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where document symbols come from. Production wires this to the server
/// pool (open document, `textDocument/documentSymbol`, close); tests
/// substitute a parser stub so no server is involved.
pub trait SymbolSource: Send + Sync {
    fn document_symbols<'a>(
        &'a self,
        path: &'a Path,
        text: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SymbolNode>>>;
}

/// One flattened, queryable symbol occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: u32,
    pub uri: String,
    pub range: Range,
    pub selection_range: Range,
    pub container: Option<String>,
    pub detail: Option<String>,
    pub deprecated: bool,
    pub is_child: bool,
    pub is_external: bool,
    pub source_library: Option<String>,
}

/// Per-file record backing the derived indices.
#[derive(Debug, Clone)]
pub struct FileSymbols {
    pub uri: String,
    pub modified_ms: u64,
    pub content_hash: String,
    pub symbols: Vec<SymbolNode>,
}

#[derive(Debug, Clone)]
pub enum IndexEvent {
    FileIndexed {
        path: PathBuf,
        symbols: usize,
        from_cache: bool,
    },
    FileRemoved {
        path: PathBuf,
    },
    IndexError {
        path: PathBuf,
        message: String,
    },
    ExternalLibrariesIndexed {
        files: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SymbolQuery {
    /// Exact name; falls back to case-insensitive substring when nothing
    /// matches exactly.
    pub name: Option<String>,
    pub kinds: Vec<u32>,
    pub container: Option<String>,
    pub file: Option<PathBuf>,
    pub include_children: bool,
    pub include_external: bool,
    pub only_external: bool,
    pub source_library: Option<String>,
}

impl SymbolQuery {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            include_children: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub files: usize,
    pub symbols: usize,
    pub last_updated_ms: u64,
}

/// In-memory symbol index over one project root.
///
/// Four structures: the file index plus name/kind/container projections.
/// Every derived entry corresponds to exactly one node in its file's
/// record; removing a file strips all of them. Queries take short read
/// locks; no lock is ever held across an LSP request.
pub struct SymbolIndex {
    root: PathBuf,
    files: RwLock<HashMap<String, FileSymbols>>,
    by_name: RwLock<HashMap<String, Vec<SymbolEntry>>>,
    by_kind: RwLock<HashMap<u32, Vec<SymbolEntry>>>,
    by_container: RwLock<HashMap<String, Vec<SymbolEntry>>>,
    cache: SymbolCache,
    source: Arc<dyn SymbolSource>,
    events: broadcast::Sender<IndexEvent>,
    last_updated_ms: AtomicU64,
}

impl SymbolIndex {
    pub fn new(root: PathBuf, cache: SymbolCache, source: Arc<dyn SymbolSource>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            root,
            files: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
            by_kind: RwLock::new(HashMap::new()),
            by_container: RwLock::new(HashMap::new()),
            cache,
            source,
            events,
            last_updated_ms: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Index a workspace file, serving from the cache when the stored
    /// content hash still matches the file on disk.
    pub async fn index_file(&self, path: &Path) -> Result<usize> {
        self.index_with_origin(path, None).await
    }

    /// Index a file belonging to an external library (outside the
    /// workspace, e.g. under node_modules).
    pub async fn index_external_file(&self, path: &Path, library: &str) -> Result<usize> {
        self.index_with_origin(path, Some(library.to_string())).await
    }

    pub async fn index_external_libraries(&self, files: &[(PathBuf, String)]) -> usize {
        let mut indexed = 0;
        for (path, library) in files {
            if self.index_external_file(path, library).await.is_ok() {
                indexed += 1;
            }
        }
        let _ = self
            .events
            .send(IndexEvent::ExternalLibrariesIndexed { files: indexed });
        indexed
    }

    /// Invalidate the cache for `path` and index it afresh. Used by the
    /// watcher on change events.
    pub async fn reindex(&self, path: &Path) -> Result<usize> {
        let rel = self.rel_path(path);
        if let Err(err) = self.cache.invalidate(&rel) {
            debug!("failed to invalidate cache for {rel}: {err:#}");
        }
        self.index_file(path).await
    }

    async fn index_with_origin(&self, path: &Path, library: Option<String>) -> Result<usize> {
        match self.try_index(path, library).await {
            Ok(count) => Ok(count),
            Err(err) => {
                let _ = self.events.send(IndexEvent::IndexError {
                    path: path.to_path_buf(),
                    message: format!("{err:#}"),
                });
                Err(err)
            }
        }
    }

    async fn try_index(&self, path: &Path, library: Option<String>) -> Result<usize> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let content_hash = sha256_hex(&bytes);
        let modified_ms = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let uri = path_to_uri(path)?;
        let rel = self.rel_path(path);

        if let Some(symbols) = self.cache.lookup(&rel, &content_hash) {
            let count = count_nodes(&symbols);
            self.install(uri, content_hash, modified_ms, symbols, library);
            let _ = self.events.send(IndexEvent::FileIndexed {
                path: path.to_path_buf(),
                symbols: count,
                from_cache: true,
            });
            return Ok(count);
        }

        let text = String::from_utf8(bytes)
            .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
        let symbols = self.source.document_symbols(path, &text).await?;
        if let Err(err) =
            self.cache
                .store(&rel, content_hash.clone(), modified_ms, symbols.clone())
        {
            debug!("failed to persist symbol cache for {rel}: {err:#}");
        }

        let count = count_nodes(&symbols);
        self.install(uri, content_hash, modified_ms, symbols, library);
        let _ = self.events.send(IndexEvent::FileIndexed {
            path: path.to_path_buf(),
            symbols: count,
            from_cache: false,
        });
        Ok(count)
    }

    pub fn remove_file(&self, path: &Path) {
        let Ok(uri) = path_to_uri(path) else {
            return;
        };
        let existed = self.files.write().remove(&uri).is_some();
        if !existed {
            return;
        }
        self.purge_entries(&uri);
        self.touch();
        let _ = self.events.send(IndexEvent::FileRemoved {
            path: path.to_path_buf(),
        });
    }

    pub fn query(&self, query: &SymbolQuery) -> Vec<SymbolEntry> {
        let mut results: Vec<SymbolEntry> = match query.name.as_deref() {
            Some(name) => {
                let by_name = self.by_name.read();
                let exact = by_name.get(name).cloned().unwrap_or_default();
                if !exact.is_empty() {
                    exact
                } else {
                    let needle = name.to_lowercase();
                    by_name
                        .iter()
                        .filter(|(key, _)| key.to_lowercase().contains(&needle))
                        .flat_map(|(_, entries)| entries.iter().cloned())
                        .collect()
                }
            }
            None => self
                .by_name
                .read()
                .values()
                .flat_map(|entries| entries.iter().cloned())
                .collect(),
        };

        if !query.kinds.is_empty() {
            results.retain(|e| query.kinds.contains(&e.kind));
        }
        if let Some(container) = query.container.as_deref() {
            results.retain(|e| e.container.as_deref() == Some(container));
        }
        if let Some(file) = query.file.as_deref()
            && let Ok(uri) = path_to_uri(file)
        {
            results.retain(|e| e.uri == uri);
        }
        if !query.include_children {
            results.retain(|e| !e.is_child);
        }
        if query.only_external {
            results.retain(|e| e.is_external);
        } else if !query.include_external {
            results.retain(|e| !e.is_external);
        }
        if let Some(library) = query.source_library.as_deref() {
            results.retain(|e| e.source_library.as_deref() == Some(library));
        }

        results.sort_by(|a, b| {
            (a.uri.as_str(), a.range.start.line, a.range.start.character, a.name.as_str()).cmp(&(
                b.uri.as_str(),
                b.range.start.line,
                b.range.start.character,
                b.name.as_str(),
            ))
        });
        results
    }

    /// Deepest symbol whose range contains `position`, or `None`.
    pub fn symbol_at(&self, path: &Path, position: Position) -> Option<SymbolNode> {
        let uri = path_to_uri(path).ok()?;
        let files = self.files.read();
        let record = files.get(&uri)?;
        deepest_containing(&record.symbols, position).cloned()
    }

    pub fn file_record(&self, path: &Path) -> Option<FileSymbols> {
        let uri = path_to_uri(path).ok()?;
        self.files.read().get(&uri).cloned()
    }

    pub fn stats(&self) -> IndexStats {
        let files = self.files.read();
        IndexStats {
            files: files.len(),
            symbols: files.values().map(|f| count_nodes(&f.symbols)).sum(),
            last_updated_ms: self.last_updated_ms.load(Ordering::Acquire),
        }
    }

    fn install(
        &self,
        uri: String,
        content_hash: String,
        modified_ms: u64,
        symbols: Vec<SymbolNode>,
        library: Option<String>,
    ) {
        let is_external = library.is_some();
        let mut entries = Vec::new();
        flatten(&uri, &symbols, None, is_external, library.as_deref(), &mut entries);

        self.files.write().insert(uri.clone(), FileSymbols {
            uri: uri.clone(),
            modified_ms,
            content_hash,
            symbols,
        });
        self.purge_entries(&uri);

        {
            let mut by_name = self.by_name.write();
            for entry in &entries {
                by_name
                    .entry(entry.name.clone())
                    .or_default()
                    .push(entry.clone());
            }
        }
        {
            let mut by_kind = self.by_kind.write();
            for entry in &entries {
                by_kind.entry(entry.kind).or_default().push(entry.clone());
            }
        }
        {
            let mut by_container = self.by_container.write();
            for entry in &entries {
                if let Some(container) = entry.container.as_deref() {
                    by_container
                        .entry(container.to_string())
                        .or_default()
                        .push(entry.clone());
                }
            }
        }
        self.touch();
    }

    fn purge_entries(&self, uri: &str) {
        {
            let mut by_name = self.by_name.write();
            by_name.retain(|_, entries| {
                entries.retain(|e| e.uri != uri);
                !entries.is_empty()
            });
        }
        {
            let mut by_kind = self.by_kind.write();
            by_kind.retain(|_, entries| {
                entries.retain(|e| e.uri != uri);
                !entries.is_empty()
            });
        }
        {
            let mut by_container = self.by_container.write();
            by_container.retain(|_, entries| {
                entries.retain(|e| e.uri != uri);
                !entries.is_empty()
            });
        }
    }

    fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn touch(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_updated_ms.store(now, Ordering::Release);
    }
}

fn flatten(
    uri: &str,
    nodes: &[SymbolNode],
    parent: Option<&str>,
    is_external: bool,
    library: Option<&str>,
    out: &mut Vec<SymbolEntry>,
) {
    for node in nodes {
        let container = node
            .container
            .clone()
            .or_else(|| parent.map(str::to_string));
        out.push(SymbolEntry {
            name: node.name.clone(),
            kind: node.kind,
            uri: uri.to_string(),
            range: node.range,
            selection_range: node.selection_range,
            container,
            detail: node.detail.clone(),
            deprecated: node.deprecated,
            is_child: parent.is_some(),
            is_external,
            source_library: library.map(str::to_string),
        });
        flatten(uri, &node.children, Some(&node.name), is_external, library, out);
    }
}

fn count_nodes(nodes: &[SymbolNode]) -> usize {
    nodes.len() + nodes.iter().map(|n| count_nodes(&n.children)).sum::<usize>()
}

fn contains(range: &Range, position: Position) -> bool {
    let after_start = (position.line, position.character)
        >= (range.start.line, range.start.character);
    let before_end = (position.line, position.character) <= (range.end.line, range.end.character);
    after_start && before_end
}

fn deepest_containing(nodes: &[SymbolNode], position: Position) -> Option<&SymbolNode> {
    for node in nodes {
        if contains(&node.range, position) {
            return deepest_containing(&node.children, position).or(Some(node));
        }
    }
    None
}
