//! Rate limiting
//!
//! - [`rule`]: rule records, validation, and trust-tier selection
//! - [`engine`]: multi-rule evaluation with cached rule reads and
//!   degrade-to-allow behavior

pub mod engine;
pub mod rule;

pub use engine::{Decision, RateLimitEngine, RuleAdmin};
pub use rule::{RateLimitRule, RuleRef, RuleTier};
