//! End-to-end flows over the in-memory stores: trust accrual feeding
//! rate-limit tier selection, device claims, and rule administration.

use std::sync::Arc;

use chrono::Utc;

use civicgate::cache::CacheService;
use civicgate::kv::{KvClient, MemoryKv};
use civicgate::location::BoundaryIndex;
use civicgate::ratelimit::{RateLimitEngine, RateLimitRule, RuleAdmin, RuleTier};
use civicgate::store::{ActionLog, MemoryActionLog, MemoryRuleStore, MemorySignalStore, RuleStore};
use civicgate::trust::{SignalType, TrustEngine, TrustLevel, TrustSignal};
use civicgate::Identity;

struct Harness {
    trust: TrustEngine,
    engine: RateLimitEngine,
    admin: RuleAdmin,
    cache: Arc<CacheService>,
}

fn harness() -> Harness {
    let cache = Arc::new(CacheService::new(Arc::new(KvClient::new(
        Arc::new(MemoryKv::new()),
        false,
    ))));
    let signals = Arc::new(MemorySignalStore::new());
    let rules: Arc<dyn RuleStore> = Arc::new(MemoryRuleStore::new());
    let log: Arc<dyn ActionLog> = Arc::new(MemoryActionLog::new());

    Harness {
        trust: TrustEngine::new(
            signals,
            Arc::new(BoundaryIndex::seeded()),
            Arc::clone(&cache),
        ),
        engine: RateLimitEngine::new(
            Arc::clone(&rules),
            Arc::clone(&log),
            Arc::clone(&cache),
        ),
        admin: RuleAdmin::new(rules, Arc::clone(&cache)),
        cache,
    }
}

#[tokio::test]
async fn anonymous_submissions_blocked_at_limit() {
    let h = harness();
    h.admin
        .create(RateLimitRule::new("wonder_submit", 60, 5, 300))
        .await
        .unwrap();

    let device = Identity::device(&"f".repeat(40)).unwrap();
    let now = Utc::now();

    for i in 0..5 {
        let decision = h.engine.evaluate(&device, None, "wonder_submit", now).await;
        assert!(decision.allowed, "submission {} should be allowed", i + 1);
        h.engine.record(&device, "wonder_submit", now).await;
    }

    let decision = h.engine.evaluate(&device, None, "wonder_submit", now).await;
    assert!(!decision.allowed);
    assert_eq!(decision.retry_after_secs, Some(300));
}

#[tokio::test]
async fn earned_trust_moves_user_to_generous_tier() {
    let h = harness();
    h.admin
        .create(RateLimitRule::new("wonder_submit", 60, 2, 300))
        .await
        .unwrap();
    h.admin
        .create(RateLimitRule::new("wonder_submit", 60, 20, 60).with_tier(RuleTier::Authenticated))
        .await
        .unwrap();

    let user = Identity::user("u1");
    let now = Utc::now();

    // Fresh user starts Basic and shares the anonymous tier
    let level = h.trust.level(&user).await.unwrap();
    assert_eq!(level, TrustLevel::Basic);
    for _ in 0..2 {
        h.engine.record(&user, "wonder_submit", now).await;
    }
    let decision = h
        .engine
        .evaluate(&user, Some(level), "wonder_submit", now)
        .await;
    assert!(!decision.allowed);

    // Email plus phone verification crosses the Verified threshold
    h.trust
        .record_signal(TrustSignal::new(user.clone(), SignalType::EmailVerified, 1.0))
        .await
        .unwrap();
    h.trust
        .record_signal(TrustSignal::new(user.clone(), SignalType::PhoneVerified, 1.0))
        .await
        .unwrap();
    let level = h.trust.level(&user).await.unwrap();
    assert_eq!(level, TrustLevel::Verified);

    // Same action history, but evaluated against the authenticated tier
    let decision = h
        .engine
        .evaluate(&user, Some(level), "wonder_submit", now)
        .await;
    assert!(decision.allowed);
}

#[tokio::test]
async fn device_claim_carries_trust_into_account() {
    let h = harness();
    let device = Identity::device(&"a1".repeat(16)).unwrap();
    let user = Identity::user("new-user");

    h.trust
        .record_signal(TrustSignal::new(
            device.clone(),
            SignalType::EmailVerified,
            1.0,
        ))
        .await
        .unwrap();
    h.trust
        .record_signal(TrustSignal::new(
            device.clone(),
            SignalType::ReturnVisit,
            1.0,
        ))
        .await
        .unwrap();
    h.trust
        .record_location_signal(&device, 37.7875, -122.4085)
        .await
        .unwrap();

    let device_score = h.trust.profile(&device).await.unwrap().score;
    assert!(device_score > 0.0);

    let moved = h.trust.claim_device(&device, &user).await.unwrap();
    assert_eq!(moved, 3);

    // History follows the user; the device identity is back to zero
    let user_profile = h.trust.profile(&user).await.unwrap();
    assert!((user_profile.score - device_score).abs() < 1e-9);
    assert_eq!(h.trust.profile(&device).await.unwrap().score, 0.0);
}

#[tokio::test]
async fn rule_changes_take_effect_within_one_request() {
    let h = harness();
    let rule = RateLimitRule::new("comment", 60, 1, 120);
    h.admin.create(rule.clone()).await.unwrap();

    let ip = Identity::ip("10.0.0.1");
    let now = Utc::now();
    h.engine.record(&ip, "comment", now).await;

    // Rule set is cached by the first evaluation
    assert!(!h.engine.evaluate(&ip, None, "comment", now).await.allowed);

    let mut loosened = rule;
    loosened.max_actions = 100;
    h.admin.update(loosened).await.unwrap();

    // Update invalidated the cached set, no TTL wait needed
    assert!(h.engine.evaluate(&ip, None, "comment", now).await.allowed);
}

#[tokio::test]
async fn cache_metrics_observe_rule_reads() {
    let h = harness();
    h.admin
        .create(RateLimitRule::new("search", 60, 10, 60))
        .await
        .unwrap();

    let ip = Identity::ip("10.0.0.2");
    let now = Utc::now();
    h.engine.evaluate(&ip, None, "search", now).await;
    h.engine.evaluate(&ip, None, "search", now).await;

    let metrics = h.cache.metrics();
    // First evaluation misses and populates; the second hits
    assert!(metrics.hits >= 1);
    assert!(metrics.misses >= 1);
}
