//! Trust signals
//!
//! Append-only weighted evidence records per user or device. Signals are
//! never mutated after creation; the one permitted change is re-owning a
//! device's signals to a user when an account is claimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Identity;

/// Base value of a location signal before the geographic bonus is added
pub const LOCATION_SIGNAL_BASE: f64 = 0.2;

/// Closed set of trust signal types. Adding a variant is a compile-time
/// obligation to assign it a weight in [`SignalType::weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    EmailVerified,
    PhoneVerified,
    LocationVerified,
    ReturnVisit,
    ContentQuality,
    CommunityValidation,
    ProfileCompletion,
    AddressVerified,
    SocialConnected,
    WonderConverted,
    CampaignSuccess,
    ModerationFlag,
}

impl SignalType {
    /// Per-type score weight. Moderation flags are the only negative signal;
    /// the aggregate is clamped at zero downstream.
    pub fn weight(&self) -> f64 {
        match self {
            Self::EmailVerified => 0.15,
            Self::PhoneVerified => 0.15,
            Self::LocationVerified => 0.15,
            Self::ReturnVisit => 0.05,
            Self::ContentQuality => 0.10,
            Self::CommunityValidation => 0.10,
            Self::ProfileCompletion => 0.10,
            Self::AddressVerified => 0.05,
            Self::SocialConnected => 0.05,
            Self::WonderConverted => 0.05,
            Self::CampaignSuccess => 0.03,
            Self::ModerationFlag => -0.20,
        }
    }

    pub const ALL: [SignalType; 12] = [
        Self::EmailVerified,
        Self::PhoneVerified,
        Self::LocationVerified,
        Self::ReturnVisit,
        Self::ContentQuality,
        Self::CommunityValidation,
        Self::ProfileCompletion,
        Self::AddressVerified,
        Self::SocialConnected,
        Self::WonderConverted,
        Self::CampaignSuccess,
        Self::ModerationFlag,
    ];
}

/// Known metadata shapes per signal type, with an opaque JSON escape hatch
/// for provider-specific extras.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SignalMetadata {
    #[default]
    None,
    Location {
        lat: f64,
        lng: f64,
        city: Option<String>,
        formatted_address: Option<String>,
    },
    Moderation {
        reason: String,
    },
    Content {
        content_id: String,
    },
    Extra(serde_json::Value),
}

/// A single weighted, optionally expiring evidence record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSignal {
    pub id: Uuid,
    pub subject: Identity,
    pub signal_type: SignalType,
    pub signal_value: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: SignalMetadata,
}

impl TrustSignal {
    pub fn new(subject: Identity, signal_type: SignalType, signal_value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            signal_type,
            signal_value,
            created_at: Utc::now(),
            expires_at: None,
            metadata: SignalMetadata::None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_metadata(mut self, metadata: SignalMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Effective value of a location signal: base plus geographic bonus.
///
/// The bonus is baked into the signal value at creation time, not applied
/// as a separate weighted term. The standard location weight then applies,
/// so higher-trust locations yield signals with higher values rather than
/// a different weight.
pub fn location_signal_value(bonus: f64) -> f64 {
    LOCATION_SIGNAL_BASE + bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_weights_cover_all_types() {
        for signal_type in SignalType::ALL {
            let w = signal_type.weight();
            assert!(w.abs() > 0.0 && w.abs() <= 0.2);
        }
        assert!(SignalType::ModerationFlag.weight() < 0.0);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let fresh = TrustSignal::new(Identity::user("u"), SignalType::EmailVerified, 1.0);
        assert!(!fresh.is_expired(now));

        let expired = TrustSignal::new(Identity::user("u"), SignalType::ReturnVisit, 1.0)
            .with_expiry(now - Duration::hours(1));
        assert!(expired.is_expired(now));

        let future = TrustSignal::new(Identity::user("u"), SignalType::ReturnVisit, 1.0)
            .with_expiry(now + Duration::hours(1));
        assert!(!future.is_expired(now));
    }

    #[test]
    fn test_location_signal_value_composition() {
        // Max bonus 0.3 gives 0.5; with the 0.15 weight the effective
        // contribution caps at 0.075.
        assert!((location_signal_value(0.3) - 0.5).abs() < f64::EPSILON);
        assert!((location_signal_value(0.1) - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metadata_serde_round_trip() {
        let meta = SignalMetadata::Location {
            lat: 37.7875,
            lng: -122.4085,
            city: Some("San Francisco".into()),
            formatted_address: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: SignalMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);

        let extra = SignalMetadata::Extra(serde_json::json!({"provider": "x"}));
        let json = serde_json::to_string(&extra).unwrap();
        let back: SignalMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, extra);
    }
}
