//! Trust subsystem
//!
//! - [`signal`]: append-only weighted evidence records
//! - [`score`]: pure aggregation from signals to a score and level
//!
//! [`TrustEngine`] ties the pieces together: it owns the signal store, the
//! boundary index for location signals, and a cached view of computed
//! profiles so hot paths do not re-aggregate on every request.

pub mod score;
pub mod signal;

pub use score::TrustLevel;
pub use signal::{SignalMetadata, SignalType, TrustSignal};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheCategory, CacheKeyBuilder, CacheService};
use crate::location::{BoundaryIndex, Geocoder, LocationBonus};
use crate::store::SignalStore;
use crate::types::{GateError, Identity, Result};

/// Computed trust state for one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustProfile {
    pub score: f64,
    pub level: TrustLevel,
    pub progress_to_next: f64,
    pub benefits: Vec<String>,
    pub next_level: Option<TrustLevel>,
    pub next_requirements: Vec<String>,
}

impl TrustProfile {
    fn from_score(score: f64) -> Self {
        let level = TrustLevel::from_score(score);
        let (next_level, next_requirements) = match score::next_level_requirements(level) {
            Some((next, reqs)) => (Some(next), reqs.iter().map(|r| r.to_string()).collect()),
            None => (None, Vec::new()),
        };
        Self {
            score,
            level,
            progress_to_next: score::progress_to_next(score, level),
            benefits: level.benefits().iter().map(|b| b.to_string()).collect(),
            next_level,
            next_requirements,
        }
    }
}

/// Signal recording and cached score computation
pub struct TrustEngine {
    signals: Arc<dyn SignalStore>,
    boundaries: Arc<BoundaryIndex>,
    cache: Arc<CacheService>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl TrustEngine {
    pub fn new(
        signals: Arc<dyn SignalStore>,
        boundaries: Arc<BoundaryIndex>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            signals,
            boundaries,
            cache,
            geocoder: None,
        }
    }

    /// Attach a reverse geocoder used only to enrich location signal
    /// metadata; scoring never depends on it.
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    fn profile_key(subject: &Identity) -> String {
        CacheKeyBuilder::new(CacheCategory::TrustScore)
            .filter("subject", subject.key())
            .build()
    }

    /// Compute (or serve cached) trust profile for an identity. Dormancy
    /// decay keys off the most recent signal, so an account with no signals
    /// at all sits at zero with nothing to erode.
    pub async fn profile(&self, subject: &Identity) -> Result<TrustProfile> {
        let key = Self::profile_key(subject);
        if let Some(profile) = self.cache.get::<TrustProfile>(&key).await.data {
            return Ok(profile);
        }

        let signals = self.signals.signals_for(subject).await?;
        let now = chrono::Utc::now();
        let mut score = score::calculate_score(&signals, now);
        if let Some(last_activity) = signals.iter().map(|s| s.created_at).max() {
            score = score::decay(last_activity, score, now);
        }

        let profile = TrustProfile::from_score(score);
        self.cache
            .set(&key, &profile, CacheCategory::TrustScore.ttl())
            .await;
        Ok(profile)
    }

    /// Current trust level, for rate-limit tier selection
    pub async fn level(&self, subject: &Identity) -> Result<TrustLevel> {
        Ok(self.profile(subject).await?.level)
    }

    /// Persist a signal and drop the subject's cached profile
    pub async fn record_signal(&self, signal: TrustSignal) -> Result<()> {
        let subject = signal.subject.clone();
        let signal_type = signal.signal_type;
        self.signals.create_signal(signal).await?;
        self.cache.invalidate(&Self::profile_key(&subject)).await;
        debug!(
            subject = subject.key(),
            signal_type = ?signal_type,
            "Trust signal recorded"
        );
        Ok(())
    }

    /// Record a location-verified signal. The geographic bonus is baked
    /// into the signal value; metadata carries the raw coordinates plus
    /// reverse-geocoded place details when a provider is configured and
    /// answers in time.
    pub async fn record_location_signal(
        &self,
        subject: &Identity,
        lat: f64,
        lng: f64,
    ) -> Result<(TrustSignal, LocationBonus)> {
        let bonus = self.boundaries.location_bonus(lat, lng)?;

        let (city, formatted_address) = match &self.geocoder {
            Some(geocoder) => match geocoder.reverse(lat, lng).await {
                Ok(place) => (Some(place.city), Some(place.formatted_address)),
                Err(e) => {
                    debug!(error = %e, "Reverse geocoding failed, storing bare coordinates");
                    (None, None)
                }
            },
            None => (None, None),
        };

        let signal = TrustSignal::new(
            subject.clone(),
            SignalType::LocationVerified,
            signal::location_signal_value(bonus.bonus),
        )
        .with_metadata(SignalMetadata::Location {
            lat,
            lng,
            city,
            formatted_address,
        });

        let recorded = signal.clone();
        self.record_signal(signal).await?;
        Ok((recorded, bonus))
    }

    /// Move every signal from an anonymous device onto a freshly
    /// authenticated user, then drop both cached profiles.
    pub async fn claim_device(&self, device: &Identity, user: &Identity) -> Result<u64> {
        if !matches!(device, Identity::Device(_)) {
            return Err(GateError::BadRequest(
                "Claim source must be a device identity".into(),
            ));
        }
        if !matches!(user, Identity::User(_)) {
            return Err(GateError::BadRequest(
                "Claim target must be a user identity".into(),
            ));
        }

        let moved = self.signals.claim_subject(device, user).await?;
        self.cache.invalidate(&Self::profile_key(device)).await;
        self.cache.invalidate(&Self::profile_key(user)).await;
        if moved > 0 {
            info!(
                device = device.key(),
                user = user.key(),
                signals = moved,
                "Device trust history claimed"
            );
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvClient, MemoryKv};
    use crate::location::GeocodedPlace;
    use crate::store::MemorySignalStore;
    use async_trait::async_trait;

    fn engine() -> TrustEngine {
        let cache = Arc::new(CacheService::new(Arc::new(KvClient::new(
            Arc::new(MemoryKv::new()),
            false,
        ))));
        TrustEngine::new(
            Arc::new(MemorySignalStore::new()),
            Arc::new(BoundaryIndex::seeded()),
            cache,
        )
    }

    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn reverse(&self, _lat: f64, _lng: f64) -> Result<GeocodedPlace> {
            Ok(GeocodedPlace {
                city: "San Francisco".into(),
                formatted_address: "1 Dr Carlton B Goodlett Pl, San Francisco, CA".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_profile_empty_is_basic() {
        let engine = engine();
        let profile = engine.profile(&Identity::user("u1")).await.unwrap();
        assert_eq!(profile.score, 0.0);
        assert_eq!(profile.level, TrustLevel::Basic);
        assert_eq!(profile.next_level, Some(TrustLevel::Verified));
        assert!(!profile.next_requirements.is_empty());
    }

    #[tokio::test]
    async fn test_signals_raise_level_immediately() {
        let engine = engine();
        let subject = Identity::user("u1");

        // Prime the cache with the empty profile first
        assert_eq!(engine.level(&subject).await.unwrap(), TrustLevel::Basic);

        engine
            .record_signal(TrustSignal::new(
                subject.clone(),
                SignalType::EmailVerified,
                1.0,
            ))
            .await
            .unwrap();
        engine
            .record_signal(TrustSignal::new(
                subject.clone(),
                SignalType::PhoneVerified,
                1.0,
            ))
            .await
            .unwrap();

        // Recording invalidated the cached profile, so the new score is
        // visible without waiting out the TTL
        let profile = engine.profile(&subject).await.unwrap();
        assert!((profile.score - 0.30).abs() < 1e-9);
        assert_eq!(profile.level, TrustLevel::Verified);
    }

    #[tokio::test]
    async fn test_location_signal_in_boundary() {
        let engine = engine().with_geocoder(Arc::new(FixedGeocoder));
        let subject = Identity::user("u1");

        let (signal, bonus) = engine
            .record_location_signal(&subject, 37.7875, -122.4085)
            .await
            .unwrap();
        assert_eq!(bonus.bonus, 0.3);
        // Base 0.2 plus within-boundary bonus 0.3
        assert!((signal.signal_value - 0.5).abs() < f64::EPSILON);
        assert!(matches!(
            signal.metadata,
            SignalMetadata::Location { city: Some(_), .. }
        ));

        // Effective contribution: 0.5 * 0.15 weight
        let profile = engine.profile(&subject).await.unwrap();
        assert!((profile.score - 0.075).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_location_signal_invalid_coords() {
        let engine = engine();
        let err = engine
            .record_location_signal(&Identity::user("u1"), 91.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_claim_device_moves_history() {
        let engine = engine();
        let device = Identity::device(&"d".repeat(32)).unwrap();
        let user = Identity::user("u1");

        engine
            .record_signal(TrustSignal::new(
                device.clone(),
                SignalType::EmailVerified,
                1.0,
            ))
            .await
            .unwrap();

        // Prime both cached profiles
        assert_eq!(engine.level(&device).await.unwrap(), TrustLevel::Basic);
        assert_eq!(engine.level(&user).await.unwrap(), TrustLevel::Basic);

        let moved = engine.claim_device(&device, &user).await.unwrap();
        assert_eq!(moved, 1);

        let profile = engine.profile(&user).await.unwrap();
        assert!(profile.score > 0.0);
        let device_profile = engine.profile(&device).await.unwrap();
        assert_eq!(device_profile.score, 0.0);
    }

    #[tokio::test]
    async fn test_claim_rejects_wrong_kinds() {
        let engine = engine();
        let user = Identity::user("u1");
        let ip = Identity::ip("1.2.3.4");
        assert!(engine.claim_device(&ip, &user).await.is_err());
        assert!(engine.claim_device(&user, &user).await.is_err());
    }
}
