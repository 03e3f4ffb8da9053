//! In-memory store implementations
//!
//! DashMap-backed stores for tests and dev mode. Semantics mirror the
//! MongoDB implementations, including the duplicate-response conflict and
//! the atomic device claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::ratelimit::rule::RateLimitRule;
use crate::trust::signal::TrustSignal;
use crate::types::{GateError, Identity, Result};

use super::{ActionLog, RuleStore, SignalStore};

/// In-memory [`SignalStore`]
#[derive(Default)]
pub struct MemorySignalStore {
    signals: DashMap<String, Vec<TrustSignal>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn create_signal(&self, signal: TrustSignal) -> Result<()> {
        self.signals
            .entry(signal.subject.key())
            .or_default()
            .push(signal);
        Ok(())
    }

    async fn signals_for(&self, subject: &Identity) -> Result<Vec<TrustSignal>> {
        Ok(self
            .signals
            .get(&subject.key())
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn claim_subject(&self, device: &Identity, user: &Identity) -> Result<u64> {
        let Some((_, mut moved)) = self.signals.remove(&device.key()) else {
            return Ok(0);
        };
        let count = moved.len() as u64;
        for signal in &mut moved {
            signal.subject = user.clone();
        }
        self.signals.entry(user.key()).or_default().extend(moved);
        Ok(count)
    }
}

/// In-memory [`ActionLog`]
#[derive(Default)]
pub struct MemoryActionLog {
    actions: DashMap<String, Vec<(String, DateTime<Utc>)>>,
    responses: DashSet<String>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionLog for MemoryActionLog {
    async fn record(&self, identity: &Identity, action_type: &str, at: DateTime<Utc>) -> Result<()> {
        self.actions
            .entry(identity.key())
            .or_default()
            .push((action_type.to_string(), at));
        Ok(())
    }

    async fn count_in_window(
        &self,
        identity: &Identity,
        action_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .actions
            .get(&identity.key())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(action, at)| action == action_type && *at >= window_start)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn record_response(&self, identity: &Identity, prompt_id: &str) -> Result<()> {
        let key = format!("{}:{}", identity.key(), prompt_id);
        if !self.responses.insert(key) {
            return Err(GateError::Conflict(format!(
                "Identity already responded to prompt {}",
                prompt_id
            )));
        }
        Ok(())
    }
}

/// In-memory [`RuleStore`]
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: DashMap<Uuid, RateLimitRule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn create(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn update(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        if !self.rules.contains_key(&rule.id) {
            return Err(GateError::NotFound(format!("Rule {}", rule.id)));
        }
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GateError::NotFound(format!("Rule {}", id)))
    }

    async fn list(&self, action_type: Option<&str>, active_only: bool) -> Result<Vec<RateLimitRule>> {
        let mut rules: Vec<RateLimitRule> = self
            .rules
            .iter()
            .filter(|r| action_type.map(|a| r.action_type == a).unwrap_or(true))
            .filter(|r| !active_only || r.is_active)
            .map(|r| r.clone())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn set_active_many(&self, ids: &[Uuid], active: bool) -> Result<u64> {
        let mut changed = 0;
        for id in ids {
            if let Some(mut rule) = self.rules.get_mut(id) {
                if rule.is_active != active {
                    rule.is_active = active;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}
