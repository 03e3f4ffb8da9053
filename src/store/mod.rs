//! Persistence seams
//!
//! The relational/document store is an external collaborator; civicgate
//! only requires the operations below. Signal and rule writes are
//! correctness-critical and propagate failures; action-log reads feed the
//! rate limiter, which degrades to allow when they fail.

pub mod memory;
pub mod mongo;

pub use memory::{MemoryActionLog, MemoryRuleStore, MemorySignalStore};
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ratelimit::rule::RateLimitRule;
use crate::trust::signal::TrustSignal;
use crate::types::{Identity, Result};

/// Append-only trust signal storage
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn create_signal(&self, signal: TrustSignal) -> Result<()>;

    async fn signals_for(&self, subject: &Identity) -> Result<Vec<TrustSignal>>;

    /// Re-own all of a device's signals to a user in one atomic claim.
    /// Returns the number of signals moved.
    async fn claim_subject(&self, device: &Identity, user: &Identity) -> Result<u64>;
}

/// Append-only request/security log backing rate-limit counts
#[async_trait]
pub trait ActionLog: Send + Sync {
    async fn record(&self, identity: &Identity, action_type: &str, at: DateTime<Utc>) -> Result<()>;

    /// Count one identity's actions of a type since `window_start`
    async fn count_in_window(
        &self,
        identity: &Identity,
        action_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64>;

    /// Record a response to a prompt, rejecting duplicates from the same
    /// identity with [`crate::GateError::Conflict`]
    async fn record_response(&self, identity: &Identity, prompt_id: &str) -> Result<()>;
}

/// Administrative storage for rate limit rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create(&self, rule: RateLimitRule) -> Result<()>;

    async fn update(&self, rule: RateLimitRule) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// List rules, optionally filtered to one action type and to active
    /// rules only, ordered by priority descending
    async fn list(&self, action_type: Option<&str>, active_only: bool) -> Result<Vec<RateLimitRule>>;

    /// Bulk enable/disable; returns the number of rules changed
    async fn set_active_many(&self, ids: &[Uuid], active: bool) -> Result<u64>;
}
