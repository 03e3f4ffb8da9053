//! Cache key construction and TTL policy
//!
//! Keys are deterministic and order-independent: filter pairs are sorted by
//! name before concatenation, and geographic coordinates are rounded to a
//! fixed decimal precision so nearby queries collapse onto the same key.
//! Three decimal places is roughly 111m, an intentional precision/hit-rate
//! tradeoff for neighborhood-scale search.

use std::fmt;
use std::time::Duration;

/// Decimal places for coordinate rounding in cache keys (~111m)
pub const GEO_KEY_PRECISION: u32 = 3;

/// Keys longer than this are digested to keep the keyspace compact
const MAX_LITERAL_KEY_LEN: usize = 160;

/// Cache categories with their namespaces and TTLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    CampaignDetail,
    CampaignSearch,
    GeoSearch,
    Geocode,
    TrustScore,
    RateLimitRules,
}

impl CacheCategory {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::CampaignDetail => "campaign",
            Self::CampaignSearch => "search",
            Self::GeoSearch => "geo",
            Self::Geocode => "geocode",
            Self::TrustScore => "trust",
            Self::RateLimitRules => "ratelimit:rules",
        }
    }

    /// Per-category TTL. Geocoding results are effectively static; search
    /// results churn quickly; rules tolerate one minute of staleness.
    pub fn ttl(&self) -> Duration {
        let secs = match self {
            Self::CampaignDetail => 600,
            Self::CampaignSearch => 120,
            Self::GeoSearch => 120,
            Self::Geocode => 86_400,
            Self::TrustScore => 300,
            Self::RateLimitRules => 60,
        };
        Duration::from_secs(secs)
    }

    /// Glob pattern matching every key in this category
    pub fn invalidation_pattern(&self) -> String {
        format!("{}:*", self.namespace())
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Round a coordinate to the given number of decimal places
pub fn round_coord(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Builder for deterministic cache keys
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    parts: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    pub fn new(category: CacheCategory) -> Self {
        Self {
            namespace: category.namespace().to_string(),
            parts: Vec::new(),
        }
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            parts: Vec::new(),
        }
    }

    /// Add a filter pair. Insertion order does not affect the final key.
    pub fn filter(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.parts.push((name.to_string(), value.to_string()));
        self
    }

    /// Add rounded coordinates
    pub fn geo(self, lat: f64, lng: f64) -> Self {
        self.geo_with_precision(lat, lng, GEO_KEY_PRECISION)
    }

    pub fn geo_with_precision(self, lat: f64, lng: f64, precision: u32) -> Self {
        let lat = round_coord(lat, precision);
        let lng = round_coord(lng, precision);
        self.filter("lat", format!("{lat:.prec$}", prec = precision as usize))
            .filter("lng", format!("{lng:.prec$}", prec = precision as usize))
    }

    pub fn build(mut self) -> String {
        if self.parts.is_empty() {
            return self.namespace;
        }

        self.parts.sort_by(|a, b| a.0.cmp(&b.0));
        let joined = self
            .parts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(":");

        let key = format!("{}:{}", self.namespace, joined);
        if key.len() <= MAX_LITERAL_KEY_LEN {
            key
        } else {
            // Digest oversized filter sets, keeping the namespace scannable
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(joined.as_bytes());
            let hash = hasher.finalize();
            format!("{}:{}", self.namespace, hex::encode(&hash[..8]))
        }
    }
}

/// Key for a single campaign's detail record
pub fn campaign_key(campaign_id: &str) -> String {
    CacheKeyBuilder::new(CacheCategory::CampaignDetail)
        .filter("id", campaign_id)
        .build()
}

/// Patterns to drop when a campaign is created or mutated: the campaign's
/// own key plus every search and geo result. Coarse on purpose; geo and
/// search results are too expensive to invalidate surgically.
pub fn campaign_invalidation_patterns(campaign_id: &str) -> Vec<String> {
    vec![
        campaign_key(campaign_id),
        CacheCategory::CampaignSearch.invalidation_pattern(),
        CacheCategory::GeoSearch.invalidation_pattern(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_independent() {
        let a = CacheKeyBuilder::new(CacheCategory::CampaignSearch)
            .filter("status", "active")
            .filter("category", "parks")
            .build();
        let b = CacheKeyBuilder::new(CacheCategory::CampaignSearch)
            .filter("category", "parks")
            .filter("status", "active")
            .build();
        assert_eq!(a, b);
        assert!(a.starts_with("search:"));
    }

    #[test]
    fn test_geo_rounding_collapses_nearby_queries() {
        let a = CacheKeyBuilder::new(CacheCategory::GeoSearch)
            .geo(37.78751, -122.40849)
            .build();
        let b = CacheKeyBuilder::new(CacheCategory::GeoSearch)
            .geo(37.78749, -122.40851)
            .build();
        assert_eq!(a, b);

        // ~1km away lands on a different key
        let c = CacheKeyBuilder::new(CacheCategory::GeoSearch)
            .geo(37.797, -122.408)
            .build();
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_filters_bare_namespace() {
        let key = CacheKeyBuilder::new(CacheCategory::TrustScore).build();
        assert_eq!(key, "trust");
    }

    #[test]
    fn test_long_key_digested_keeps_namespace() {
        let mut builder = CacheKeyBuilder::new(CacheCategory::CampaignSearch);
        for i in 0..40 {
            builder = builder.filter(&format!("filter_{i}"), "some-long-value");
        }
        let key = builder.build();
        assert!(key.starts_with("search:"));
        assert!(key.len() <= MAX_LITERAL_KEY_LEN);
    }

    #[test]
    fn test_round_coord() {
        assert_eq!(round_coord(37.78751, 3), 37.788);
        assert_eq!(round_coord(-122.40849, 3), -122.408);
    }

    #[test]
    fn test_campaign_invalidation_covers_search_and_geo() {
        let patterns = campaign_invalidation_patterns("c42");
        assert!(patterns.contains(&"campaign:id=c42".to_string()));
        assert!(patterns.contains(&"search:*".to_string()));
        assert!(patterns.contains(&"geo:*".to_string()));
    }

    #[test]
    fn test_category_ttls() {
        assert_eq!(CacheCategory::Geocode.ttl(), Duration::from_secs(86_400));
        assert_eq!(CacheCategory::RateLimitRules.ttl(), Duration::from_secs(60));
    }
}
