//! Key-value client handle with graceful degradation
//!
//! An explicit resource handle constructed once at process start and passed
//! by dependency injection into the cache service. Every operation is
//! preceded by an availability probe; a failed probe short-circuits to the
//! degraded path so cache trouble costs latency, never correctness. Each
//! outage is logged once, not once per sub-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::KeyValueStore;
use crate::types::{GateError, Result};

/// Default per-operation deadline; distinct from any request timeout so a
/// stalled store degrades to a miss instead of stalling the request
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(250);

/// Handle over an optional key-value backend.
pub struct KvClient {
    store: Option<Arc<dyn KeyValueStore>>,
    dev_mode: bool,
    op_timeout: Duration,
    /// Log-once latch for the current outage, reset on recovery
    outage_logged: AtomicBool,
}

impl KvClient {
    /// Create a client over a configured backend
    pub fn new(store: Arc<dyn KeyValueStore>, dev_mode: bool) -> Self {
        Self {
            store: Some(store),
            dev_mode,
            op_timeout: DEFAULT_OP_TIMEOUT,
            outage_logged: AtomicBool::new(false),
        }
    }

    /// Create a client with no backend: every read misses, and writes
    /// report success only in dev mode.
    pub fn unconfigured(dev_mode: bool) -> Self {
        Self {
            store: None,
            dev_mode,
            op_timeout: DEFAULT_OP_TIMEOUT,
            outage_logged: AtomicBool::new(false),
        }
    }

    /// Override the per-operation deadline (CACHE_TIMEOUT_MS)
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Run a store operation under the per-operation deadline; a timeout is
    /// indistinguishable from an outage to callers
    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.note_outage(op);
                Err(GateError::Unavailable(format!(
                    "key-value {op} exceeded {}ms",
                    self.op_timeout.as_millis()
                )))
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Probe the backend; unconfigured counts as unavailable
    pub async fn is_available(&self) -> bool {
        match &self.store {
            Some(store) => {
                let alive = tokio::time::timeout(self.op_timeout, store.ping())
                    .await
                    .unwrap_or(false);
                if alive {
                    self.note_recovery();
                }
                alive
            }
            None => false,
        }
    }

    fn note_outage(&self, what: &str) {
        if !self.outage_logged.swap(true, Ordering::Relaxed) {
            warn!(operation = what, "Key-value store unavailable, degrading to miss");
        }
    }

    fn note_recovery(&self) {
        if self.outage_logged.swap(false, Ordering::Relaxed) {
            debug!("Key-value store recovered");
        }
    }

    /// Resolve the backend or return the unavailable sentinel
    async fn available_store(&self, op: &str) -> Result<&Arc<dyn KeyValueStore>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| GateError::Unavailable("key-value store not configured".into()))?;
        let alive = tokio::time::timeout(self.op_timeout, store.ping())
            .await
            .unwrap_or(false);
        if !alive {
            self.note_outage(op);
            return Err(GateError::Unavailable("key-value store probe failed".into()));
        }
        self.note_recovery();
        Ok(store)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let store = self.available_store("get").await?;
        self.bounded("get", store.get(key)).await
    }

    /// Set a value. Unconfigured stores are a no-op success in dev mode
    /// (explicit graceful-degradation policy), a failure otherwise.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        match self.available_store("set").await {
            Ok(store) => match self.bounded("set", store.set(key, value, ttl)).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(key = key, error = %e, "Cache set failed");
                    false
                }
            },
            Err(_) => self.store.is_none() && self.dev_mode,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let store = self.available_store("exists").await?;
        self.bounded("exists", store.exists(key)).await
    }

    pub async fn del(&self, keys: &[String]) -> u64 {
        match self.available_store("del").await {
            Ok(store) => self.bounded("del", store.del(keys)).await.unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Delete everything matching a glob pattern using a cursor scan.
    /// Safe to call repeatedly; returns the count actually removed.
    ///
    /// The full match set is collected before any delete is issued:
    /// deleting mid-scan shifts what the cursor walks over and strands
    /// matches in the already-consumed range.
    pub async fn scan_del(&self, pattern: &str) -> u64 {
        let store = match self.available_store("scan_del").await {
            Ok(store) => store,
            Err(_) => return 0,
        };

        let mut matched: Vec<String> = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = match self.bounded("scan", store.scan(cursor, pattern, 100)).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(pattern = pattern, error = %e, "Cache scan failed mid-iteration");
                    break;
                }
            };
            matched.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut removed = 0;
        for chunk in matched.chunks(100) {
            removed += self.bounded("del", store.del(chunk)).await.unwrap_or(0);
        }
        removed
    }

    pub async fn pipeline_set(&self, entries: &[(String, String, Duration)]) -> bool {
        match self.available_store("pipeline_set").await {
            Ok(store) => {
                self.bounded("pipeline_set", store.pipeline_set(entries))
                    .await
                    .is_ok()
            }
            Err(_) => self.store.is_none() && self.dev_mode,
        }
    }
}
