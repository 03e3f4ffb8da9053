//! Civicgate - trust-scored caching and rate limiting for civic platforms
//!
//! Civicgate sits between request-handling code and the source of truth,
//! protecting anonymous and low-trust write paths with three cooperating
//! subsystems:
//!
//! - **Cache**: read-through caching with TTL policy, pattern invalidation,
//!   and refresh-ahead (stale-while-revalidate) serving
//! - **Trust**: weighted, decaying trust scores aggregated from append-only
//!   signals, mapped to discrete levels that gate feature access
//! - **Rate limiting**: priority-ordered, per-action rules evaluated against
//!   an append-only action log, with trust-level tier selection
//! - **Location**: community boundary matching that feeds a geographic bonus
//!   into location trust signals
//!
//! The cache is never a hard dependency for correctness, only for latency:
//! every failure degrades to a miss and falls through to the source of truth.

pub mod cache;
pub mod config;
pub mod kv;
pub mod location;
pub mod logging;
pub mod ratelimit;
pub mod store;
pub mod trust;
pub mod types;

pub use cache::{CacheCategory, CacheMetrics, CacheResult, CacheService};
pub use config::Args;
pub use kv::{KvClient, MemoryKv};
pub use location::{BoundaryIndex, CommunityBoundary, Geocoder};
pub use ratelimit::{Decision, RateLimitEngine, RateLimitRule, RuleAdmin, RuleTier};
pub use trust::{SignalType, TrustEngine, TrustLevel, TrustProfile, TrustSignal};
pub use types::{GateError, Identity, Result};
