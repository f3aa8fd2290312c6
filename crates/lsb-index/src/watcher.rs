use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::index::SymbolIndex;

/// Filesystem watcher driving cache invalidation and reindexing.
///
/// Every indexed file is watched individually. Change events are debounced
/// by notify, then coalesced once more in the worker so a burst of saves
/// produces one reindex. A path that no longer exists is treated as a
/// rename/unlink: the file leaves the index and the watch is dropped.
pub struct IndexWatcher {
    debouncer: Mutex<Debouncer<RecommendedWatcher>>,
    watched: Mutex<HashSet<PathBuf>>,
}

impl IndexWatcher {
    pub fn spawn(index: Arc<SymbolIndex>, debounce: Duration) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let debouncer = new_debouncer(
            debounce,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        let _ = tx.send(event.path);
                    }
                }
                Err(err) => error!("file watcher error: {err}"),
            },
        )
        .context("failed to create file watcher")?;

        let watcher = Arc::new(Self {
            debouncer: Mutex::new(debouncer),
            watched: Mutex::new(HashSet::new()),
        });

        watcher.clone().spawn_worker(index, rx);
        Ok(watcher)
    }

    pub fn watch(&self, path: &Path) -> Result<()> {
        let newly_added = self.watched.lock().insert(path.to_path_buf());
        if !newly_added {
            return Ok(());
        }
        self.debouncer
            .lock()
            .watcher()
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", path.display()))
    }

    pub fn unwatch(&self, path: &Path) {
        let was_watched = self.watched.lock().remove(path);
        if was_watched {
            let _ = self.debouncer.lock().watcher().unwatch(path);
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }

    fn spawn_worker(
        self: Arc<Self>,
        index: Arc<SymbolIndex>,
        mut rx: mpsc::UnboundedReceiver<PathBuf>,
    ) {
        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                // Coalesce whatever else arrived in the same window.
                let mut batch = HashSet::new();
                batch.insert(first);
                while let Ok(path) = rx.try_recv() {
                    batch.insert(path);
                }

                for path in batch {
                    if path.exists() {
                        if let Err(err) = index.reindex(&path).await {
                            debug!("reindex of {} failed: {err:#}", path.display());
                        }
                    } else {
                        index.remove_file(&path);
                        self.unwatch(&path);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SymbolCache;
    use crate::index::{BoxFuture, IndexEvent, SymbolSource};
    use lsb_lsp::SymbolNode;
    use lsb_lsp::proto::{Position, Range};
    use tokio::time::timeout;

    struct OneSymbolSource;

    impl SymbolSource for OneSymbolSource {
        fn document_symbols<'a>(
            &'a self,
            _path: &'a Path,
            text: &'a str,
        ) -> BoxFuture<'a, anyhow::Result<Vec<SymbolNode>>> {
            let name = text.trim().to_string();
            Box::pin(async move {
                let zero = Position {
                    line: 0,
                    character: 0,
                };
                Ok(vec![SymbolNode {
                    name,
                    kind: 12,
                    range: Range {
                        start: zero,
                        end: Position {
                            line: 1,
                            character: 0,
                        },
                    },
                    selection_range: Range {
                        start: zero,
                        end: zero,
                    },
                    detail: None,
                    deprecated: false,
                    container: None,
                    children: Vec::new(),
                }])
            })
        }
    }

    async fn wait_for_event<F>(
        events: &mut tokio::sync::broadcast::Receiver<IndexEvent>,
        mut matches: F,
    ) -> IndexEvent
    where
        F: FnMut(&IndexEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event bus closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for index event")
    }

    #[tokio::test]
    async fn change_event_triggers_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let index = SymbolIndex::new(
            root.clone(),
            SymbolCache::open(&root, None),
            Arc::new(OneSymbolSource),
        );

        let path = root.join("a.ts");
        tokio::fs::write(&path, "before").await.unwrap();
        index.index_file(&path).await.unwrap();

        let watcher = IndexWatcher::spawn(index.clone(), Duration::from_millis(50)).unwrap();
        watcher.watch(&path).unwrap();

        let mut events = index.subscribe();
        tokio::fs::write(&path, "after").await.unwrap();

        wait_for_event(&mut events, |e| {
            matches!(e, IndexEvent::FileIndexed { from_cache: false, .. })
        })
        .await;

        let results = index.query(&crate::index::SymbolQuery::named("after"));
        assert_eq!(results.len(), 1);
        assert!(
            index
                .query(&crate::index::SymbolQuery::named("before"))
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unlink_removes_the_file_and_its_watch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let index = SymbolIndex::new(
            root.clone(),
            SymbolCache::open(&root, None),
            Arc::new(OneSymbolSource),
        );

        let path = root.join("gone.ts");
        tokio::fs::write(&path, "doomed").await.unwrap();
        index.index_file(&path).await.unwrap();

        let watcher = IndexWatcher::spawn(index.clone(), Duration::from_millis(50)).unwrap();
        watcher.watch(&path).unwrap();
        assert_eq!(watcher.watched_count(), 1);

        let mut events = index.subscribe();
        tokio::fs::remove_file(&path).await.unwrap();

        wait_for_event(&mut events, |e| matches!(e, IndexEvent::FileRemoved { .. })).await;

        assert_eq!(index.stats().files, 0);
        assert_eq!(watcher.watched_count(), 0);
    }

    #[test]
    fn watch_is_idempotent_per_path() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let index = SymbolIndex::new(
            root.clone(),
            SymbolCache::open(&root, None),
            Arc::new(OneSymbolSource),
        );
        let watcher = IndexWatcher::spawn(index, Duration::from_millis(50)).unwrap();

        let path = root.join("x.ts");
        std::fs::write(&path, "x").unwrap();
        watcher.watch(&path).unwrap();
        watcher.watch(&path).unwrap();
        assert_eq!(watcher.watched_count(), 1);

        watcher.unwatch(&path);
        assert_eq!(watcher.watched_count(), 0);
    }
}
