//! Cache service
//!
//! Read-through caching over the key-value client with hit/miss/latency
//! metrics, pattern invalidation, and refresh-ahead serving. All failures
//! degrade to "treat as cache miss, fall through to source of truth"; this
//! layer is never a hard dependency for correctness, only for latency.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kv::KvClient;
use crate::types::Result;

use super::keys::campaign_invalidation_patterns;
use super::refresh::{RefreshFuture, RefreshQueue, RefreshTask};

/// Outcome of a cache read. Never an Err: backing-store trouble shows up
/// as a miss with `error` populated.
#[derive(Debug)]
pub struct CacheResult<T> {
    pub data: Option<T>,
    pub hit: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl<T> CacheResult<T> {
    fn hit(data: T, latency_ms: f64) -> Self {
        Self {
            data: Some(data),
            hit: true,
            latency_ms,
            error: None,
        }
    }

    fn miss(latency_ms: f64, error: Option<String>) -> Self {
        Self {
            data: None,
            hit: false,
            latency_ms,
            error,
        }
    }

    fn computed(data: T, latency_ms: f64) -> Self {
        Self {
            data: Some(data),
            hit: false,
            latency_ms,
            error: None,
        }
    }
}

/// Rolling cache metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
}

/// Envelope for refresh-ahead entries: the payload plus enough bookkeeping
/// to decide when a background recomputation is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshEnvelope {
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub refresh_threshold_secs: u64,
}

impl RefreshEnvelope {
    pub fn new(data: serde_json::Value, ttl: Duration, refresh_threshold: Duration) -> Self {
        Self {
            data,
            created_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            refresh_threshold_secs: refresh_threshold.as_secs(),
        }
    }

    /// Whether the entry has crossed its soft refresh threshold
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.created_at).num_seconds();
        age >= 0 && age as u64 >= self.refresh_threshold_secs
    }
}

/// Read-through cache with metrics and refresh-ahead support.
///
/// Constructed once at process start and shared by dependency injection;
/// there is no hidden global client.
pub struct CacheService {
    kv: Arc<KvClient>,
    refresh: Option<RefreshQueue>,
    hits: AtomicU64,
    misses: AtomicU64,
    get_calls: AtomicU64,
    latency_total_us: AtomicU64,
}

impl CacheService {
    pub fn new(kv: Arc<KvClient>) -> Self {
        Self {
            kv,
            refresh: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
            latency_total_us: AtomicU64::new(0),
        }
    }

    /// Enable refresh-ahead with a bounded background queue.
    /// Must be called from within a tokio runtime (spawns the worker).
    pub fn with_refresh_queue(mut self, depth: usize) -> Self {
        self.refresh = Some(RefreshQueue::new(depth, Arc::clone(&self.kv)));
        self
    }

    pub fn kv(&self) -> &Arc<KvClient> {
        &self.kv
    }

    fn record(&self, hit: bool, elapsed: Duration) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Read a value. Never errors; unavailability is a miss with `error` set.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let start = Instant::now();
        let outcome = self.kv.get(key).await;
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        match outcome {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.record(true, elapsed);
                    debug!(key = key, "Cache hit");
                    CacheResult::hit(value, latency_ms)
                }
                Err(e) => {
                    // A payload we cannot decode is as good as absent
                    self.record(false, elapsed);
                    debug!(key = key, error = %e, "Cache payload decode failed");
                    CacheResult::miss(latency_ms, Some(format!("decode failed: {e}")))
                }
            },
            Ok(None) => {
                self.record(false, elapsed);
                debug!(key = key, "Cache miss");
                CacheResult::miss(latency_ms, None)
            }
            Err(e) => {
                self.record(false, elapsed);
                CacheResult::miss(latency_ms, Some(e.to_string()))
            }
        }
    }

    /// Store a value with a TTL. Reports `true` on success or when the
    /// store is unconfigured in dev mode, `false` on genuine failure.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key = key, error = %e, "Cache serialization failed");
                return false;
            }
        };
        self.kv.set(key, &raw, ttl).await
    }

    /// Read-through: on miss, invoke `fetch` exactly once, store the result
    /// with the given TTL, and return it tagged `hit: false`. A fetch
    /// failure is surfaced in `error`, never as a panic or Err.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, fetch: F, ttl: Duration) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cached = self.get::<T>(key).await;
        if cached.hit {
            return cached;
        }

        let start = Instant::now();
        match fetch().await {
            Ok(value) => {
                self.set(key, &value, ttl).await;
                let latency_ms = cached.latency_ms + start.elapsed().as_secs_f64() * 1000.0;
                CacheResult::computed(value, latency_ms)
            }
            Err(e) => {
                let latency_ms = cached.latency_ms + start.elapsed().as_secs_f64() * 1000.0;
                CacheResult::miss(latency_ms, Some(e.to_string()))
            }
        }
    }

    /// Drop a single key
    pub async fn invalidate(&self, key: &str) -> bool {
        self.kv.del(&[key.to_string()]).await > 0
    }

    /// Drop a set of keys, returning the count removed
    pub async fn invalidate_many(&self, keys: &[String]) -> u64 {
        self.kv.del(keys).await
    }

    /// Drop everything matching a glob pattern via cursor scan.
    /// Idempotent; returns the count actually removed.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> u64 {
        let removed = self.kv.scan_del(pattern).await;
        if removed > 0 {
            debug!(pattern = pattern, removed = removed, "Pattern invalidation");
        }
        removed
    }

    /// Coarse invalidation for a campaign mutation: the campaign's own key
    /// plus all search and geo prefixes.
    pub async fn invalidate_campaign(&self, campaign_id: &str) -> u64 {
        let mut removed = 0;
        for pattern in campaign_invalidation_patterns(campaign_id) {
            if pattern.contains('*') {
                removed += self.invalidate_by_pattern(&pattern).await;
            } else {
                removed += self.kv.del(&[pattern]).await;
            }
        }
        removed
    }

    /// Store a value wrapped in a refresh-ahead envelope. The threshold
    /// defaults to 75% of the TTL.
    pub async fn refresh_ahead<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        refresh_threshold: Option<Duration>,
    ) -> bool {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                debug!(key = key, error = %e, "Refresh-ahead serialization failed");
                return false;
            }
        };
        let threshold = refresh_threshold.unwrap_or_else(|| ttl.mul_f64(0.75));
        let envelope = RefreshEnvelope::new(data, ttl, threshold);
        self.set(key, &envelope, ttl).await
    }

    /// Read a refresh-ahead entry. If the entry is past its soft threshold
    /// (still valid), serve it immediately and schedule a non-blocking
    /// background recomputation; the refresh's own failure never reaches
    /// this caller.
    pub async fn get_with_refresh<T, F>(&self, key: &str, recompute: F) -> CacheResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> RefreshFuture,
    {
        let result = self.get::<RefreshEnvelope>(key).await;
        let Some(envelope) = result.data else {
            return CacheResult::miss(result.latency_ms, result.error);
        };

        if envelope.is_stale(Utc::now()) {
            if let Some(queue) = &self.refresh {
                debug!(key = key, "Stale entry served, refresh scheduled");
                queue
                    .submit(RefreshTask {
                        key: key.to_string(),
                        ttl: Duration::from_secs(envelope.ttl_secs),
                        refresh_threshold: Duration::from_secs(envelope.refresh_threshold_secs),
                        recompute: recompute(),
                    })
                    .await;
            }
        }

        match serde_json::from_value::<T>(envelope.data) {
            Ok(value) => CacheResult::hit(value, result.latency_ms),
            Err(e) => {
                // The envelope read already counted a hit; an undecodable
                // payload is a miss, so reclassify it
                self.hits.fetch_sub(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, error = %e, "Refresh payload decode failed");
                CacheResult::miss(result.latency_ms, Some(format!("decode failed: {e}")))
            }
        }
    }

    /// Snapshot of rolling metrics
    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let calls = self.get_calls.load(Ordering::Relaxed);
        let total_us = self.latency_total_us.load(Ordering::Relaxed);

        let total = hits + misses;
        CacheMetrics {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            avg_latency_ms: if calls == 0 {
                0.0
            } else {
                (total_us as f64 / calls as f64) / 1000.0
            },
        }
    }
}
