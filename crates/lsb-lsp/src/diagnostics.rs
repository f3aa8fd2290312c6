use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, timeout};

use lsb_core::error::{BrokerError, Result};

use crate::proto::Diagnostic;

/// Latest push diagnostics per document URI.
///
/// Each `publishDiagnostics` replaces the stored list wholesale, so `get`
/// always reflects exactly the most recent notification. Pull diagnostics
/// live on the client (they are a request); when the server lacks them the
/// client falls back to this snapshot.
#[derive(Default)]
pub struct DiagnosticsStore {
    latest: Mutex<HashMap<String, Vec<Diagnostic>>>,
    waiters: Mutex<HashMap<String, Arc<Notify>>>,
    first_publish: Notify,
    seen_any: AtomicBool,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh snapshot for `uri`. Diagnostics with an empty range are
    /// dropped; servers occasionally emit them for whole-file conditions and
    /// they carry no usable location.
    pub async fn record(&self, uri: String, diagnostics: Vec<Diagnostic>) {
        let kept: Vec<Diagnostic> = diagnostics
            .into_iter()
            .filter(|d| d.range.start != d.range.end)
            .collect();

        {
            let mut latest = self.latest.lock().await;
            latest.insert(uri.clone(), kept);
        }

        self.seen_any.store(true, Ordering::Release);
        self.first_publish.notify_waiters();

        let waiter = {
            let waiters = self.waiters.lock().await;
            waiters.get(&uri).cloned()
        };
        if let Some(waiter) = waiter {
            waiter.notify_waiters();
        }
    }

    pub async fn get(&self, uri: &str) -> Vec<Diagnostic> {
        let latest = self.latest.lock().await;
        latest.get(uri).cloned().unwrap_or_default()
    }

    /// Distinguishes "no publish seen for this URI" from "published empty".
    pub async fn snapshot(&self, uri: &str) -> Option<Vec<Diagnostic>> {
        let latest = self.latest.lock().await;
        latest.get(uri).cloned()
    }

    pub async fn clear(&self, uri: &str) {
        let mut latest = self.latest.lock().await;
        latest.remove(uri);
    }

    /// Resolve on the next `publishDiagnostics` for `uri`, or fail with
    /// `Timeout`.
    pub async fn wait_for(&self, uri: &str, within: Duration) -> Result<Vec<Diagnostic>> {
        let waiter = {
            let mut waiters = self.waiters.lock().await;
            waiters
                .entry(uri.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone()
        };

        let notified = waiter.notified();
        if timeout(within, notified).await.is_err() {
            return Err(BrokerError::Timeout {
                method: "textDocument/publishDiagnostics".to_string(),
            });
        }
        Ok(self.get(uri).await)
    }

    /// Readiness probe: true once any `publishDiagnostics` has been seen,
    /// waiting up to `within` for the first one.
    pub async fn wait_for_first_publish(&self, within: Duration) -> bool {
        let notified = self.first_publish.notified();
        if self.seen_any.load(Ordering::Acquire) {
            return true;
        }
        timeout(within, notified).await.is_ok()
    }
}
