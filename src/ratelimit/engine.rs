//! Rate limit evaluation
//!
//! All active rules for an action and tier are evaluated against the
//! identity's trailing-window action counts; any violated rule blocks, and
//! the retry delay is the longest block duration among violations. A
//! violation also persists a block marker keyed by identity, action, and
//! tier so the block holds for its full duration even after the window
//! slides past the triggering actions. The engine performs no locking:
//! counts come from the append-only log, ties at exactly `max_actions`
//! block, and a small over-admission under racing writers is acceptable
//! while a false block is not.
//!
//! When the rule store or the log is unavailable the engine defaults to
//! permissive: this gates a civic platform's usability, not a security
//! perimeter. Degraded mode is logged once per outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheCategory, CacheKeyBuilder, CacheService};
use crate::store::{ActionLog, RuleStore};
use crate::trust::score::TrustLevel;
use crate::types::{Identity, Result};

use super::rule::{RateLimitRule, RuleRef, RuleTier};

/// Outcome of a rate limit evaluation. Being limited is an expected
/// control-flow branch, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_secs: Option<u64>,
    pub violated: Vec<RuleRef>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
            violated: Vec::new(),
        }
    }

    fn block(retry_after_secs: u64, violated: Vec<RuleRef>) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
            violated,
        }
    }

    /// "Try again in N seconds" message for blocked requests
    pub fn user_message(&self) -> Option<String> {
        (!self.allowed).then(|| {
            format!(
                "Too many requests. Try again in {} seconds.",
                self.retry_after_secs.unwrap_or(0)
            )
        })
    }
}

/// Namespace for persisted block markers
const BLOCK_NAMESPACE: &str = "ratelimit:block";

/// Persisted outcome of a violated evaluation. The marker lives in the
/// key-value store with a TTL matching the block duration; when the store
/// is unavailable the engine falls back to window counts alone.
#[derive(Debug, Serialize, Deserialize)]
struct BlockState {
    until: DateTime<Utc>,
    violated: Vec<RuleRef>,
}

/// Priority-ordered, multi-rule rate limiter
pub struct RateLimitEngine {
    rules: Arc<dyn RuleStore>,
    log: Arc<dyn ActionLog>,
    cache: Arc<CacheService>,
    degraded_logged: AtomicBool,
}

impl RateLimitEngine {
    pub fn new(rules: Arc<dyn RuleStore>, log: Arc<dyn ActionLog>, cache: Arc<CacheService>) -> Self {
        Self {
            rules,
            log,
            cache,
            degraded_logged: AtomicBool::new(false),
        }
    }

    fn note_degraded(&self, what: &str) {
        if !self.degraded_logged.swap(true, Ordering::Relaxed) {
            warn!(
                dependency = what,
                "Rate limit dependency unavailable, allowing traffic (degraded mode)"
            );
        }
    }

    fn note_healthy(&self) {
        if self.degraded_logged.swap(false, Ordering::Relaxed) {
            debug!("Rate limit dependencies recovered");
        }
    }

    fn tier_name(tier: RuleTier) -> &'static str {
        match tier {
            RuleTier::Anonymous => "anonymous",
            RuleTier::Authenticated => "authenticated",
            RuleTier::Pro => "pro",
        }
    }

    fn rules_cache_key(action_type: &str, tier: RuleTier) -> String {
        CacheKeyBuilder::new(CacheCategory::RateLimitRules)
            .filter("action", action_type)
            .filter("tier", Self::tier_name(tier))
            .build()
    }

    fn block_key(identity: &Identity, action_type: &str, tier: RuleTier) -> String {
        CacheKeyBuilder::with_namespace(BLOCK_NAMESPACE)
            .filter("identity", identity.key())
            .filter("action", action_type)
            .filter("tier", Self::tier_name(tier))
            .build()
    }

    /// Read a still-active block marker. Raw key-value access so block
    /// checks do not skew content cache metrics.
    async fn active_block(&self, key: &str, now: DateTime<Utc>) -> Option<BlockState> {
        let raw = self.cache.kv().get(key).await.ok().flatten()?;
        let state: BlockState = serde_json::from_str(&raw).ok()?;
        (state.until > now).then_some(state)
    }

    async fn store_block(&self, key: &str, state: &BlockState, retry_after: u64) {
        if let Ok(raw) = serde_json::to_string(state) {
            self.cache
                .kv()
                .set(key, &raw, std::time::Duration::from_secs(retry_after))
                .await;
        }
    }

    /// Fetch active rules for an action and tier, read through the cache.
    /// Admin mutations invalidate the cached set, so eventual consistency
    /// is bounded by one rules TTL.
    async fn active_rules(&self, action_type: &str, tier: RuleTier) -> Option<Vec<RateLimitRule>> {
        let key = Self::rules_cache_key(action_type, tier);
        let result = self
            .cache
            .get_or_compute(
                &key,
                || async {
                    let rules = self.rules.list(Some(action_type), true).await?;
                    Ok(rules.into_iter().filter(|r| r.tier == tier).collect::<Vec<_>>())
                },
                CacheCategory::RateLimitRules.ttl(),
            )
            .await;

        // Cache misses are invisible here; absent data means the rule store
        // itself failed to answer
        result.data
    }

    /// Evaluate an action attempt. Never errors: dependency failures
    /// degrade to an allow decision.
    pub async fn evaluate(
        &self,
        identity: &Identity,
        level: Option<TrustLevel>,
        action_type: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        let tier = RuleTier::select(identity, level);

        // An unexpired block holds regardless of what the window counts say
        // now; actions slide out of the window long before a long block ends.
        let block_key = Self::block_key(identity, action_type, tier);
        if let Some(state) = self.active_block(&block_key, now).await {
            let remaining = (state.until - now).num_seconds().max(1) as u64;
            return Decision::block(remaining, state.violated);
        }

        let Some(rules) = self.active_rules(action_type, tier).await else {
            self.note_degraded("rule store");
            return Decision::allow();
        };

        let mut violated: Vec<RuleRef> = Vec::new();
        let mut retry_after = 0u64;

        // Rules are independent: every active rule is checked even when a
        // higher-priority one has already been violated.
        for rule in &rules {
            let window_start = now - Duration::seconds(rule.time_window_secs as i64);
            let count = match self
                .log
                .count_in_window(identity, action_type, window_start)
                .await
            {
                Ok(count) => count,
                Err(_) => {
                    self.note_degraded("action log");
                    return Decision::allow();
                }
            };

            if count >= rule.max_actions {
                retry_after = retry_after.max(rule.block_duration_secs);
                violated.push(RuleRef::from(rule));
            }
        }

        self.note_healthy();

        if violated.is_empty() {
            Decision::allow()
        } else {
            debug!(
                identity = identity.key(),
                action = action_type,
                violations = violated.len(),
                retry_after_secs = retry_after,
                "Rate limit exceeded"
            );
            let state = BlockState {
                until: now + Duration::seconds(retry_after as i64),
                violated: violated.clone(),
            };
            self.store_block(&block_key, &state, retry_after).await;
            Decision::block(retry_after, violated)
        }
    }

    /// Append an allowed action to the log. Log failures degrade (the next
    /// evaluation under-counts slightly rather than failing the request).
    pub async fn record(&self, identity: &Identity, action_type: &str, at: DateTime<Utc>) {
        if self.log.record(identity, action_type, at).await.is_err() {
            self.note_degraded("action log");
        }
    }
}

/// Administrative rule management. Pure CRUD, off the hot path; every
/// mutation invalidates the cached rule sets. Failures here are hard
/// errors since they represent correctness-critical writes.
pub struct RuleAdmin {
    rules: Arc<dyn RuleStore>,
    cache: Arc<CacheService>,
}

impl RuleAdmin {
    pub fn new(rules: Arc<dyn RuleStore>, cache: Arc<CacheService>) -> Self {
        Self { rules, cache }
    }

    async fn invalidate_rules(&self) {
        self.cache
            .invalidate_by_pattern(&CacheCategory::RateLimitRules.invalidation_pattern())
            .await;
        // Blocks derived from the old rule set do not survive the mutation
        self.cache
            .invalidate_by_pattern(&format!("{BLOCK_NAMESPACE}:*"))
            .await;
    }

    pub async fn create(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        self.rules.create(rule).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    pub async fn update(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        self.rules.update(rule).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    pub async fn delete(&self, id: uuid::Uuid) -> Result<()> {
        self.rules.delete(id).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    pub async fn list(&self, action_type: Option<&str>) -> Result<Vec<RateLimitRule>> {
        self.rules.list(action_type, false).await
    }

    pub async fn set_active_many(&self, ids: &[uuid::Uuid], active: bool) -> Result<u64> {
        let changed = self.rules.set_active_many(ids, active).await?;
        if changed > 0 {
            self.invalidate_rules().await;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvClient, MemoryKv};
    use crate::store::{MemoryActionLog, MemoryRuleStore};

    fn cache() -> Arc<CacheService> {
        Arc::new(CacheService::new(Arc::new(KvClient::new(
            Arc::new(MemoryKv::new()),
            false,
        ))))
    }

    fn engine_with(
        rules: Arc<MemoryRuleStore>,
        log: Arc<MemoryActionLog>,
    ) -> (RateLimitEngine, RuleAdmin) {
        let cache = cache();
        (
            RateLimitEngine::new(rules.clone(), log, Arc::clone(&cache)),
            RuleAdmin::new(rules, cache),
        )
    }

    #[tokio::test]
    async fn test_sixth_action_blocked() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        admin
            .create(RateLimitRule::new("wonder_submit", 60, 5, 300))
            .await
            .unwrap();

        let id = Identity::ip("1.2.3.4");
        let now = Utc::now();

        for _ in 0..5 {
            let decision = engine.evaluate(&id, None, "wonder_submit", now).await;
            assert!(decision.allowed);
            engine.record(&id, "wonder_submit", now).await;
        }

        let decision = engine.evaluate(&id, None, "wonder_submit", now).await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(300));
        assert_eq!(decision.violated.len(), 1);
        assert!(decision.user_message().unwrap().contains("300 seconds"));
    }

    #[tokio::test]
    async fn test_allowed_after_window_passes() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        admin
            .create(RateLimitRule::new("wonder_submit", 60, 5, 300))
            .await
            .unwrap();

        let id = Identity::ip("1.2.3.4");
        let then = Utc::now() - Duration::seconds(400);
        for _ in 0..5 {
            engine.record(&id, "wonder_submit", then).await;
        }

        // Old actions fell out of the window; block duration has elapsed
        let decision = engine.evaluate(&id, None, "wonder_submit", Utc::now()).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_tie_at_max_blocks() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        admin
            .create(RateLimitRule::new("search", 60, 3, 60))
            .await
            .unwrap();

        let id = Identity::ip("5.6.7.8");
        let now = Utc::now();
        for _ in 0..3 {
            engine.record(&id, "search", now).await;
        }

        // Exactly max_actions in the window must block
        let decision = engine.evaluate(&id, None, "search", now).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_low_priority_rule_still_blocks() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        // Generous high-priority rule, strict low-priority rule
        admin
            .create(RateLimitRule::new("geocode", 60, 100, 60).with_priority(10))
            .await
            .unwrap();
        admin
            .create(RateLimitRule::new("geocode", 3600, 2, 900).with_priority(1))
            .await
            .unwrap();

        let id = Identity::ip("9.9.9.9");
        let now = Utc::now();
        for _ in 0..2 {
            engine.record(&id, "geocode", now).await;
        }

        let decision = engine.evaluate(&id, None, "geocode", now).await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(900));
    }

    #[tokio::test]
    async fn test_tiers_evaluate_separate_rule_sets() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        admin
            .create(RateLimitRule::new("wonder_submit", 60, 1, 300))
            .await
            .unwrap();
        admin
            .create(
                RateLimitRule::new("wonder_submit", 60, 50, 60).with_tier(RuleTier::Authenticated),
            )
            .await
            .unwrap();

        let anon = Identity::ip("1.1.1.1");
        let user = Identity::user("u1");
        let now = Utc::now();

        engine.record(&anon, "wonder_submit", now).await;
        engine.record(&user, "wonder_submit", now).await;

        // Anonymous tier has exhausted its single action
        let decision = engine.evaluate(&anon, None, "wonder_submit", now).await;
        assert!(!decision.allowed);

        // Verified user evaluates against the generous authenticated tier
        let decision = engine
            .evaluate(&user, Some(TrustLevel::Verified), "wonder_submit", now)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_no_rules_allows() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, _admin) = engine_with(rules, log);

        let decision = engine
            .evaluate(&Identity::ip("1.2.3.4"), None, "unknown_action", Utc::now())
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_block_outlasts_sliding_window() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        admin
            .create(RateLimitRule::new("wonder_submit", 60, 5, 300))
            .await
            .unwrap();

        let id = Identity::ip("3.3.3.3");
        let now = Utc::now();
        for _ in 0..5 {
            engine.record(&id, "wonder_submit", now).await;
        }

        let decision = engine.evaluate(&id, None, "wonder_submit", now).await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(300));

        // 61s later the triggering actions have left the 60s window, but
        // the 300s block still holds with the remaining time
        let later = now + Duration::seconds(61);
        let decision = engine.evaluate(&id, None, "wonder_submit", later).await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(239));
        assert_eq!(decision.violated.len(), 1);

        // After the full block duration the identity is admitted again
        let after = now + Duration::seconds(301);
        let decision = engine.evaluate(&id, None, "wonder_submit", after).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_rule_store_down_allows() {
        use crate::types::GateError;
        use async_trait::async_trait;

        struct DownRuleStore;

        #[async_trait]
        impl RuleStore for DownRuleStore {
            async fn create(&self, _rule: RateLimitRule) -> Result<()> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn update(&self, _rule: RateLimitRule) -> Result<()> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn delete(&self, _id: uuid::Uuid) -> Result<()> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn list(
                &self,
                _action_type: Option<&str>,
                _active_only: bool,
            ) -> Result<Vec<RateLimitRule>> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn set_active_many(&self, _ids: &[uuid::Uuid], _active: bool) -> Result<u64> {
                Err(GateError::Database("connection refused".into()))
            }
        }

        let log = Arc::new(MemoryActionLog::new());
        let engine = RateLimitEngine::new(Arc::new(DownRuleStore), log, cache());

        let decision = engine
            .evaluate(&Identity::ip("4.4.4.4"), None, "wonder_submit", Utc::now())
            .await;
        assert!(decision.allowed);
        assert!(decision.retry_after_secs.is_none());
    }

    #[tokio::test]
    async fn test_action_log_down_allows() {
        use crate::types::GateError;
        use async_trait::async_trait;

        struct DownActionLog;

        #[async_trait]
        impl ActionLog for DownActionLog {
            async fn record(
                &self,
                _identity: &Identity,
                _action_type: &str,
                _at: DateTime<Utc>,
            ) -> Result<()> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn count_in_window(
                &self,
                _identity: &Identity,
                _action_type: &str,
                _window_start: DateTime<Utc>,
            ) -> Result<u64> {
                Err(GateError::Database("connection refused".into()))
            }
            async fn record_response(&self, _identity: &Identity, _prompt_id: &str) -> Result<()> {
                Err(GateError::Database("connection refused".into()))
            }
        }

        let rules = Arc::new(MemoryRuleStore::new());
        let cache = cache();
        let engine = RateLimitEngine::new(
            rules.clone(),
            Arc::new(DownActionLog),
            Arc::clone(&cache),
        );
        let admin = RuleAdmin::new(rules, cache);

        // Even a rule that would block on the first repeat cannot fire
        // without window counts
        admin
            .create(RateLimitRule::new("wonder_submit", 60, 1, 300))
            .await
            .unwrap();

        let id = Identity::ip("5.5.5.5");
        let decision = engine.evaluate(&id, None, "wonder_submit", Utc::now()).await;
        assert!(decision.allowed);

        // Recording into a dead log must not error or panic
        engine.record(&id, "wonder_submit", Utc::now()).await;
        let decision = engine.evaluate(&id, None, "wonder_submit", Utc::now()).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_rule_mutation_invalidates_cache() {
        let rules = Arc::new(MemoryRuleStore::new());
        let log = Arc::new(MemoryActionLog::new());
        let (engine, admin) = engine_with(rules, Arc::clone(&log));

        let rule = RateLimitRule::new("wonder_submit", 60, 1, 300);
        let rule_id = rule.id;
        admin.create(rule.clone()).await.unwrap();

        let id = Identity::ip("2.2.2.2");
        let now = Utc::now();
        engine.record(&id, "wonder_submit", now).await;
        assert!(!engine.evaluate(&id, None, "wonder_submit", now).await.allowed);

        // Loosen the rule; the cached set must be dropped immediately
        let mut loosened = rule;
        loosened.max_actions = 10;
        admin.update(loosened).await.unwrap();
        assert!(engine.evaluate(&id, None, "wonder_submit", now).await.allowed);

        // Disable entirely
        admin.set_active_many(&[rule_id], false).await.unwrap();
        assert!(engine.evaluate(&id, None, "wonder_submit", now).await.allowed);
    }
}
