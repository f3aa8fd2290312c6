use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use lsb_core::config::ResolvedServer;
use lsb_core::error::{BrokerError, Result};

use crate::capabilities::{self, SHUTDOWN_GRACE};
use crate::client::{LspClient, LspClientOptions};
use crate::documents::DocumentSession;

/// Pool key: one server per canonicalized project root and language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub root: PathBuf,
    pub language: String,
}

/// A live server entry. The lifecycle runs Spawning → Initializing → Ready
/// (owned by the pool) → Draining → Stopped (after the last release); a
/// fatal transport error short-circuits to Stopped and the next acquire
/// respawns.
pub struct ServerEntry {
    pub key: PoolKey,
    pub server: ResolvedServer,
    client: Arc<LspClient>,
    session: Arc<DocumentSession>,
    refs: AtomicUsize,
    first_open_settled: AtomicBool,
}

impl ServerEntry {
    pub fn client(&self) -> &Arc<LspClient> {
        &self.client
    }

    pub fn session(&self) -> &Arc<DocumentSession> {
        &self.session
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// The profile's document-open settle delay, paid once per server
    /// lifetime after the first open.
    pub async fn settle_after_first_open(&self) {
        if !self.first_open_settled.swap(true, Ordering::AcqRel) {
            sleep(self.server.open_delay).await;
        }
    }
}

pub type LaunchResult = Result<Arc<LspClient>>;
pub type LaunchFuture = Pin<Box<dyn Future<Output = LaunchResult> + Send>>;
/// Starts and initializes a client for a pool key. Injected so tests can
/// connect in-process servers instead of spawning subprocesses.
pub type Launcher = Arc<dyn Fn(PoolKey, ResolvedServer) -> LaunchFuture + Send + Sync>;

enum Slot {
    /// Initialization in flight; the channel resolves to the outcome.
    Starting(watch::Receiver<Option<Result<Arc<ServerEntry>>>>),
    Ready(Arc<ServerEntry>),
}

pub struct ServerPool {
    slots: Mutex<HashMap<PoolKey, Slot>>,
    launcher: Launcher,
}

impl ServerPool {
    pub fn new(launcher: Launcher) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            launcher,
        })
    }

    /// Spawn-and-initialize launcher used in production.
    pub fn with_process_launcher() -> Arc<Self> {
        Self::new(Arc::new(|key: PoolKey, server: ResolvedServer| {
            Box::pin(async move {
                let options = LspClientOptions {
                    command: server.command.clone(),
                    args: server.args.clone(),
                    cwd: key.root.clone(),
                    request_timeout: server.request_timeout,
                };
                info!(
                    "starting language server: {} {:?} (root={})",
                    options.command,
                    options.args,
                    key.root.display()
                );
                let client = LspClient::spawn(&options, &key.root).await?;
                capabilities::initialize(&client, &key.root, &server).await?;
                Ok(client)
            }) as LaunchFuture
        }))
    }

    pub async fn size(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Acquire a handle for `(root, language)`, spawning the server if
    /// needed. Concurrent acquires of the same cold key share one
    /// initialization (single-flight); everyone else increments the ref
    /// count of the existing entry.
    pub async fn acquire(
        self: &Arc<Self>,
        root: &Path,
        server: ResolvedServer,
    ) -> Result<PoolHandle> {
        let root = root
            .canonicalize()
            .map_err(|_| BrokerError::FileNotFound(root.to_path_buf()))?;
        let key = PoolKey {
            root,
            language: server.language.clone(),
        };

        enum Next {
            Ready(Arc<ServerEntry>),
            Wait(watch::Receiver<Option<Result<Arc<ServerEntry>>>>),
            Launch,
        }

        loop {
            let next = {
                let mut slots = self.slots.lock().await;

                // A fatal transport error leaves a Stopped entry behind:
                // evict it so this acquire respawns.
                let dead = matches!(
                    slots.get(&key),
                    Some(Slot::Ready(entry)) if !entry.client.is_alive()
                );
                if dead {
                    warn!(
                        "evicting dead server entry for {} ({})",
                        key.root.display(),
                        key.language
                    );
                    if let Some(Slot::Ready(entry)) = slots.remove(&key) {
                        let client = entry.client.clone();
                        tokio::spawn(async move { client.shutdown(SHUTDOWN_GRACE).await });
                    }
                }

                match slots.get(&key) {
                    Some(Slot::Ready(entry)) => {
                        entry.refs.fetch_add(1, Ordering::AcqRel);
                        Next::Ready(entry.clone())
                    }
                    Some(Slot::Starting(rx)) => Next::Wait(rx.clone()),
                    None => Next::Launch,
                }
            };

            match next {
                Next::Ready(entry) => return Ok(PoolHandle::new(self.clone(), entry)),
                Next::Wait(mut rx) => {
                    let outcome = rx
                        .wait_for(|v| v.is_some())
                        .await
                        .map_err(|_| BrokerError::Transport("server launch was abandoned".into()))?
                        .clone()
                        .unwrap_or(Err(BrokerError::NotInitialized));
                    if let Err(err) = outcome {
                        return Err(err);
                    }
                    // The entry is now Ready in the map; loop to claim it.
                }
                Next::Launch => return self.launch(key.clone(), server.clone()).await,
            }
        }
    }

    async fn launch(self: &Arc<Self>, key: PoolKey, server: ResolvedServer) -> Result<PoolHandle> {
        let (tx, rx) = watch::channel(None);
        {
            let mut slots = self.slots.lock().await;
            // Lost a race between the lock drops: someone else now holds the
            // slot. Retry through acquire.
            if slots.contains_key(&key) {
                drop(slots);
                return Box::pin(self.acquire(&key.root, server)).await;
            }
            slots.insert(key.clone(), Slot::Starting(rx));
        }

        match (self.launcher)(key.clone(), server.clone()).await {
            Ok(client) => {
                let session = Arc::new(DocumentSession::new(client.clone()));
                capabilities::warm_up(&session, &key.root, &server).await;
                let entry = Arc::new(ServerEntry {
                    key: key.clone(),
                    server,
                    client,
                    session,
                    refs: AtomicUsize::new(1),
                    first_open_settled: AtomicBool::new(false),
                });
                {
                    let mut slots = self.slots.lock().await;
                    slots.insert(key, Slot::Ready(entry.clone()));
                }
                let _ = tx.send(Some(Ok(entry.clone())));
                Ok(PoolHandle::new(self.clone(), entry))
            }
            Err(err) => {
                {
                    let mut slots = self.slots.lock().await;
                    slots.remove(&key);
                }
                let _ = tx.send(Some(Err(err.clone())));
                Err(err)
            }
        }
    }

    async fn release_entry(&self, entry: Arc<ServerEntry>) {
        if entry.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // Last reference: drain the slot unless a concurrent acquire
        // revived it while we were waiting for the lock.
        let removed = {
            let mut slots = self.slots.lock().await;
            match slots.get(&entry.key) {
                Some(Slot::Ready(current))
                    if Arc::ptr_eq(current, &entry) && entry.ref_count() == 0 =>
                {
                    slots.remove(&entry.key)
                }
                _ => None,
            }
        };

        if let Some(Slot::Ready(entry)) = removed {
            debug!(
                "draining language server for {} ({})",
                entry.key.root.display(),
                entry.key.language
            );
            entry.client.shutdown(SHUTDOWN_GRACE).await;
        }
    }

    /// Release every entry and stop its server.
    pub async fn shutdown_all(&self) {
        let entries: Vec<Arc<ServerEntry>> = {
            let mut slots = self.slots.lock().await;
            slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Ready(entry) => Some(entry),
                    Slot::Starting(_) => None,
                })
                .collect()
        };
        for entry in entries {
            entry.client.shutdown(SHUTDOWN_GRACE).await;
        }
    }
}

/// RAII handle over a pool entry: releasing (explicitly or on drop) runs on
/// every exit path, so an orchestrator failure can never leak a reference.
pub struct PoolHandle {
    pool: Arc<ServerPool>,
    entry: Arc<ServerEntry>,
    released: AtomicBool,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("key", &self.entry.key)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}

impl PoolHandle {
    fn new(pool: Arc<ServerPool>, entry: Arc<ServerEntry>) -> Self {
        Self {
            pool,
            entry,
            released: AtomicBool::new(false),
        }
    }

    pub fn entry(&self) -> &Arc<ServerEntry> {
        &self.entry
    }

    pub fn client(&self) -> &Arc<LspClient> {
        self.entry.client()
    }

    pub fn session(&self) -> &Arc<DocumentSession> {
        self.entry.session()
    }

    /// Deterministic release; the drop guard covers early exits.
    pub async fn release(self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.pool.release_entry(self.entry.clone()).await;
        }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let pool = self.pool.clone();
            let entry = self.entry.clone();
            tokio::spawn(async move { pool.release_entry(entry).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer, lsp_basics};
    use serde_json::Value;

    fn test_launcher(spawn_count: Arc<AtomicUsize>) -> Launcher {
        Arc::new(move |_key: PoolKey, _server: ResolvedServer| {
            let spawn_count = spawn_count.clone();
            Box::pin(async move {
                spawn_count.fetch_add(1, Ordering::SeqCst);
                // A touch of latency widens the single-flight race window.
                sleep(tokio::time::Duration::from_millis(20)).await;
                let server = TestServer::start(|method, _p| {
                    lsp_basics(method).unwrap_or(Reply::Result(Value::Null))
                });
                Ok(server.client.clone())
            }) as LaunchFuture
        })
    }

    fn resolved(language: &str) -> ResolvedServer {
        lsb_core::config::resolve_server(&lsb_core::config::BrokerConfig::default(), language, None)
            .unwrap()
    }

    #[tokio::test]
    async fn ten_cold_acquires_spawn_exactly_one_server() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let pool = ServerPool::new(test_launcher(spawns.clone()));
        let root = tempfile::tempdir().unwrap();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let root = root.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                pool.acquire(&root, resolved("typescript")).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(spawns.load(Ordering::SeqCst), 1);
        assert_eq!(pool.size().await, 1);
        assert_eq!(handles[0].entry().ref_count(), 10);
        for pair in handles.windows(2) {
            assert!(Arc::ptr_eq(pair[0].entry(), pair[1].entry()));
        }

        for handle in handles {
            handle.release().await;
        }
        assert_eq!(pool.size().await, 0);
    }

    #[tokio::test]
    async fn acquire_release_restores_pool_size() {
        let pool = ServerPool::new(test_launcher(Arc::new(AtomicUsize::new(0))));
        let root = tempfile::tempdir().unwrap();

        assert_eq!(pool.size().await, 0);
        let a = pool.acquire(root.path(), resolved("go")).await.unwrap();
        let b = pool.acquire(root.path(), resolved("go")).await.unwrap();
        assert_eq!(pool.size().await, 1);
        assert_eq!(a.entry().ref_count(), 2);

        b.release().await;
        assert_eq!(pool.size().await, 1);
        a.release().await;
        assert_eq!(pool.size().await, 0);
    }

    #[tokio::test]
    async fn different_languages_get_separate_entries() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let pool = ServerPool::new(test_launcher(spawns.clone()));
        let root = tempfile::tempdir().unwrap();

        let ts = pool
            .acquire(root.path(), resolved("typescript"))
            .await
            .unwrap();
        let go = pool.acquire(root.path(), resolved("go")).await.unwrap();

        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert_eq!(pool.size().await, 2);
        assert!(!Arc::ptr_eq(ts.entry(), go.entry()));

        ts.release().await;
        go.release().await;
    }

    #[tokio::test]
    async fn launch_failure_is_surfaced_and_slot_removed() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let launcher: Launcher = {
            let attempts = attempts.clone();
            Arc::new(move |_key, _server| {
                let attempts = attempts.clone();
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BrokerError::Transport("spawn failed".into()))
                    } else {
                        let server = TestServer::start(|method, _p| {
                            lsp_basics(method).unwrap_or(Reply::Result(Value::Null))
                        });
                        Ok(server.client.clone())
                    }
                }) as LaunchFuture
            })
        };
        let pool = ServerPool::new(launcher);
        let root = tempfile::tempdir().unwrap();

        let err = pool
            .acquire(root.path(), resolved("go"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
        assert_eq!(pool.size().await, 0);

        // The failure did not wedge the slot: the next acquire retries.
        let handle = pool.acquire(root.path(), resolved("go")).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        handle.release().await;
    }

    #[tokio::test]
    async fn dead_entry_is_respawned_on_next_acquire() {
        let spawns = Arc::new(AtomicUsize::new(0));
        let hangup = Arc::new(AtomicBool::new(false));
        let launcher: Launcher = {
            let spawns = spawns.clone();
            let hangup = hangup.clone();
            Arc::new(move |_key, _server| {
                let spawns = spawns.clone();
                let hangup = hangup.clone();
                Box::pin(async move {
                    spawns.fetch_add(1, Ordering::SeqCst);
                    let server = TestServer::start(move |method, _p| {
                        if method == "test/die" && hangup.load(Ordering::SeqCst) {
                            return Reply::HangUp;
                        }
                        lsp_basics(method).unwrap_or(Reply::Result(Value::Null))
                    });
                    Ok(server.client.clone())
                }) as LaunchFuture
            })
        };
        let pool = ServerPool::new(launcher);
        let root = tempfile::tempdir().unwrap();

        let handle = pool
            .acquire(root.path(), resolved("typescript"))
            .await
            .unwrap();
        hangup.store(true, Ordering::SeqCst);
        let err = handle
            .client()
            .request("test/die", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
        handle.release().await;

        let handle = pool
            .acquire(root.path(), resolved("typescript"))
            .await
            .unwrap();
        assert!(handle.client().is_alive());
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        handle.release().await;
    }
}
