//! Rate limit rules
//!
//! A rule constrains one action type to `max_actions` within a trailing
//! `time_window_secs`, blocking violators for `block_duration_secs`.
//! Multiple rules may target the same action; all active rules are
//! evaluated independently and any violation blocks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trust::score::TrustLevel;
use crate::types::{GateError, Identity, Result};

/// Which rule set applies to a request, chosen from identity and trust
/// level before evaluation. The evaluation algorithm itself is
/// identity-agnostic once the tier is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    Anonymous,
    Authenticated,
    Pro,
}

impl RuleTier {
    /// Select the tier: anonymous identities and Basic-level users get the
    /// anonymous tier; Verified and Trusted users the authenticated tier;
    /// Leaders the pro tier.
    pub fn select(identity: &Identity, level: Option<TrustLevel>) -> Self {
        if !identity.is_authenticated() {
            return Self::Anonymous;
        }
        match level.unwrap_or(TrustLevel::Basic) {
            TrustLevel::Basic => Self::Anonymous,
            TrustLevel::Verified | TrustLevel::Trusted => Self::Authenticated,
            TrustLevel::Leader => Self::Pro,
        }
    }
}

/// A single rate limit constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub id: Uuid,
    pub action_type: String,
    pub tier: RuleTier,
    pub time_window_secs: u64,
    pub max_actions: u64,
    pub block_duration_secs: u64,
    pub is_active: bool,
    pub priority: i32,
}

impl RateLimitRule {
    pub fn new(
        action_type: &str,
        time_window_secs: u64,
        max_actions: u64,
        block_duration_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type: action_type.to_string(),
            tier: RuleTier::Anonymous,
            time_window_secs,
            max_actions,
            block_duration_secs,
            is_active: true,
            priority: 0,
        }
    }

    pub fn with_tier(mut self, tier: RuleTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.action_type.trim().is_empty() {
            return Err(GateError::BadRequest("Rule action_type must not be empty".into()));
        }
        if self.time_window_secs == 0 {
            return Err(GateError::BadRequest("Rule time_window_secs must be positive".into()));
        }
        if self.max_actions == 0 {
            return Err(GateError::BadRequest("Rule max_actions must be positive".into()));
        }
        Ok(())
    }
}

/// Lightweight reference to a violated rule, suitable for responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRef {
    pub id: Uuid,
    pub action_type: String,
    pub priority: i32,
}

impl From<&RateLimitRule> for RuleRef {
    fn from(rule: &RateLimitRule) -> Self {
        Self {
            id: rule.id,
            action_type: rule.action_type.clone(),
            priority: rule.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(RateLimitRule::new("a", 60, 5, 300).validate().is_ok());
        assert!(RateLimitRule::new("", 60, 5, 300).validate().is_err());
        assert!(RateLimitRule::new("a", 0, 5, 300).validate().is_err());
        assert!(RateLimitRule::new("a", 60, 0, 300).validate().is_err());
    }

    #[test]
    fn test_tier_selection() {
        let anon = Identity::ip("1.2.3.4");
        let user = Identity::user("u1");

        assert_eq!(RuleTier::select(&anon, None), RuleTier::Anonymous);
        assert_eq!(
            RuleTier::select(&anon, Some(TrustLevel::Leader)),
            RuleTier::Anonymous
        );
        assert_eq!(RuleTier::select(&user, None), RuleTier::Anonymous);
        assert_eq!(
            RuleTier::select(&user, Some(TrustLevel::Verified)),
            RuleTier::Authenticated
        );
        assert_eq!(
            RuleTier::select(&user, Some(TrustLevel::Trusted)),
            RuleTier::Authenticated
        );
        assert_eq!(
            RuleTier::select(&user, Some(TrustLevel::Leader)),
            RuleTier::Pro
        );
    }
}
