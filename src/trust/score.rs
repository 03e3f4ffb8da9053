//! Trust score aggregation and levels
//!
//! Scores are derived on demand from the signal set, never stored. Expired
//! signals contribute nothing; duplicate signal types count only their
//! maximum value; the final sum is clamped to [0,1] no matter how extreme
//! the inputs (callers are not trusted to keep values in range).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::{SignalType, TrustSignal};

/// Days of inactivity before trust starts to erode
const DECAY_GRACE_DAYS: i64 = 30;

/// Score lost per day of inactivity beyond the grace period
const DECAY_PER_DAY: f64 = 0.001;

/// Discrete trust tiers derived from score. Level is monotonic in score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustLevel {
    Basic,
    Verified,
    Trusted,
    Leader,
}

impl TrustLevel {
    /// Lower score threshold of this level
    pub fn threshold(&self) -> f64 {
        match self {
            Self::Basic => 0.0,
            Self::Verified => 0.25,
            Self::Trusted => 0.50,
            Self::Leader => 0.75,
        }
    }

    pub fn from_score(score: f64) -> Self {
        if score >= Self::Leader.threshold() {
            Self::Leader
        } else if score >= Self::Trusted.threshold() {
            Self::Trusted
        } else if score >= Self::Verified.threshold() {
            Self::Verified
        } else {
            Self::Basic
        }
    }

    pub fn next(&self) -> Option<TrustLevel> {
        match self {
            Self::Basic => Some(Self::Verified),
            Self::Verified => Some(Self::Trusted),
            Self::Trusted => Some(Self::Leader),
            Self::Leader => None,
        }
    }

    fn own_benefits(&self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["Submit wonders", "Vote on campaigns"],
            Self::Verified => &["Create campaigns", "Comment on wonders"],
            Self::Trusted => &["Skip review queues", "Higher rate limits"],
            Self::Leader => &["Moderate community content", "Feature campaigns"],
        }
    }

    /// Benefits are monotonically additive: every benefit of a lower level
    /// is included in all higher levels.
    pub fn benefits(&self) -> Vec<&'static str> {
        [Self::Basic, Self::Verified, Self::Trusted, Self::Leader]
            .iter()
            .filter(|level| *level <= self)
            .flat_map(|level| level.own_benefits().iter().copied())
            .collect()
    }
}

/// Aggregate a signal set into a score in [0,1].
///
/// Expired signals are dropped; only the maximum non-expired value per type
/// counts; each kept value is multiplied by its type weight and summed.
/// Negative signals can drive the intermediate sum below zero but the
/// result is clamped, never reported negative.
pub fn calculate_score(signals: &[TrustSignal], now: DateTime<Utc>) -> f64 {
    let mut max_per_type: HashMap<SignalType, f64> = HashMap::new();
    for signal in signals {
        if signal.is_expired(now) {
            continue;
        }
        max_per_type
            .entry(signal.signal_type)
            .and_modify(|v| *v = v.max(signal.signal_value))
            .or_insert(signal.signal_value);
    }

    let sum: f64 = max_per_type
        .iter()
        .map(|(signal_type, value)| signal_type.weight() * value)
        .sum();

    sum.clamp(0.0, 1.0)
}

/// Progress toward the next level as a percentage in [0,100]: linear
/// between the current level's lower and upper thresholds. Leader always
/// reports 100.
pub fn progress_to_next(score: f64, level: TrustLevel) -> f64 {
    let Some(next) = level.next() else {
        return 100.0;
    };
    let lower = level.threshold();
    let upper = next.threshold();
    (((score - lower) / (upper - lower)) * 100.0).clamp(0.0, 100.0)
}

/// What it takes to reach the next level; `None` for Leader (terminal).
pub fn next_level_requirements(level: TrustLevel) -> Option<(TrustLevel, Vec<&'static str>)> {
    let next = level.next()?;
    let requirements: Vec<&'static str> = match next {
        TrustLevel::Verified => vec!["Verify your email address", "Complete your profile"],
        TrustLevel::Trusted => vec!["Verify your location", "Contribute quality content"],
        TrustLevel::Leader => vec![
            "Earn community validations",
            "Run a successful campaign",
        ],
        TrustLevel::Basic => vec![],
    };
    Some((next, requirements))
}

/// Erode the score of a dormant account: identity for the first 30 days of
/// inactivity, then 0.001 per day beyond that, floored at zero. Decay never
/// increases a score.
pub fn decay(last_activity: DateTime<Utc>, score: f64, now: DateTime<Utc>) -> f64 {
    let days_inactive = (now - last_activity).num_days();
    if days_inactive <= DECAY_GRACE_DAYS {
        return score;
    }
    let eroded = score - DECAY_PER_DAY * (days_inactive - DECAY_GRACE_DAYS) as f64;
    eroded.max(0.0)
}
