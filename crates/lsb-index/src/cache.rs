use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lsb_lsp::SymbolNode;

/// Cache entry format version; bumping it discards older caches wholesale.
const CACHE_VERSION: u32 = 1;
/// Soft record bound applied at save time.
const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub content_hash: String,
    pub modified_ms: u64,
    /// Updated on every hit; drives LRU eviction only.
    pub last_used_ms: u64,
    pub symbols: Vec<SymbolNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    records: HashMap<String, CacheRecord>,
}

/// Content-addressed persistent cache of document-symbol trees.
///
/// One JSON file per project root, at `<root>/.lsmcp/cache/symbols.json`,
/// keyed by workspace-relative path. A lookup hits iff the stored content
/// hash equals the current on-disk hash; everything else is a miss.
pub struct SymbolCache {
    cache_path: PathBuf,
    capacity: usize,
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl SymbolCache {
    pub fn open(root: &Path, capacity: Option<usize>) -> Self {
        let cache_path = root.join(".lsmcp").join("cache").join("symbols.json");
        let records = match std::fs::read(&cache_path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) if file.version == CACHE_VERSION => file.records,
                Ok(file) => {
                    debug!(
                        "discarding symbol cache with version {} (expected {CACHE_VERSION})",
                        file.version
                    );
                    HashMap::new()
                }
                Err(err) => {
                    warn!("discarding unreadable symbol cache: {err}");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            cache_path,
            capacity: capacity.unwrap_or(DEFAULT_CAPACITY),
            records: Mutex::new(records),
        }
    }

    /// Valid iff the stored hash matches `content_hash`.
    pub fn lookup(&self, rel_path: &str, content_hash: &str) -> Option<Vec<SymbolNode>> {
        let mut records = self.records.lock();
        let record = records.get_mut(rel_path)?;
        if record.content_hash != content_hash {
            return None;
        }
        record.last_used_ms = now_ms();
        Some(record.symbols.clone())
    }

    pub fn store(
        &self,
        rel_path: &str,
        content_hash: String,
        modified_ms: u64,
        symbols: Vec<SymbolNode>,
    ) -> Result<()> {
        {
            let mut records = self.records.lock();
            records.insert(rel_path.to_string(), CacheRecord {
                content_hash,
                modified_ms,
                last_used_ms: now_ms(),
                symbols,
            });
        }
        self.save()
    }

    /// Drop every record for `rel_path`.
    pub fn invalidate(&self, rel_path: &str) -> Result<()> {
        let removed = {
            let mut records = self.records.lock();
            records.remove(rel_path).is_some()
        };
        if removed {
            self.save()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock();
            if records.len() > self.capacity {
                evict_lru(&mut records, self.capacity);
            }
            records.clone()
        };

        let parent = self
            .cache_path
            .parent()
            .context("cache path has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory: {}", parent.display()))?;

        let file = CacheFile {
            version: CACHE_VERSION,
            records: snapshot,
        };
        let bytes = serde_json::to_vec(&file)?;

        // Atomic replace: readers never observe a half-written cache.
        let tmp_path = self.cache_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &bytes)
            .with_context(|| format!("failed to write cache: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.cache_path)
            .with_context(|| format!("failed to replace cache: {}", self.cache_path.display()))?;
        Ok(())
    }
}

fn evict_lru(records: &mut HashMap<String, CacheRecord>, capacity: usize) {
    let excess = records.len().saturating_sub(capacity);
    if excess == 0 {
        return;
    }
    let mut by_age: Vec<(String, u64)> = records
        .iter()
        .map(|(k, v)| (k.clone(), v.last_used_ms))
        .collect();
    by_age.sort_by_key(|(_, used)| *used);
    for (key, _) in by_age.into_iter().take(excess) {
        records.remove(&key);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
