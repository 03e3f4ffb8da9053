//! Key-value store abstraction
//!
//! The cache backend is an external collaborator: civicgate only requires
//! get/set-with-ttl/exists/del/cursor-scan/pipeline over string keys. The
//! in-process [`MemoryKv`] implementation backs tests and single-node
//! deployments; a remote client can slot in behind the same trait. The core
//! runs correctly with no store configured at all, falling back to direct
//! persistence reads.

pub mod client;
pub mod memory;

pub use client::KvClient;
pub use memory::MemoryKv;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::Result;

/// Operations civicgate requires from a key-value backend.
///
/// `scan` is cursor-based so pattern invalidation never blocks co-tenants
/// of the store with a full-keyspace operation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys, returning the count actually removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// One page of keys matching a glob pattern. Returns the next cursor
    /// (0 when iteration is complete) and the page of matches.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Batched set of multiple entries
    async fn pipeline_set(&self, entries: &[(String, String, Duration)]) -> Result<()>;

    /// Liveness probe; a failed probe short-circuits to the degraded path
    async fn ping(&self) -> bool;
}

/// Match a key against a glob pattern supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                // Greedy: consume zero or more key bytes
                inner(&p[1..], k) || (!k.is_empty() && inner(p, &k[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &k[1..]),
            (Some(pc), Some(kc)) if pc == kc => inner(&p[1..], &k[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}
