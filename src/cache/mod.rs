//! Caching subsystem
//!
//! - [`keys`]: deterministic key construction and per-category TTL policy
//! - [`service`]: read-through cache with metrics and pattern invalidation
//! - [`refresh`]: bounded background queue for stale-while-revalidate

pub mod keys;
pub mod refresh;
pub mod service;

pub use keys::{campaign_invalidation_patterns, campaign_key, CacheCategory, CacheKeyBuilder};
pub use refresh::{RefreshFuture, RefreshQueue, RefreshTask};
pub use service::{CacheMetrics, CacheResult, CacheService, RefreshEnvelope};
