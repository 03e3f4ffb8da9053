//! Community boundary matching and location trust bonus
//!
//! Static geographic reference data: named circles (center + radius) that
//! grant a trust bonus when a submitted location falls inside or near a
//! known community region. Distance uses the haversine formula; boundary
//! membership is inclusive at exactly the radius, and when circles overlap
//! the smallest radius wins (most specific, not nearest-center).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{GateError, Result};

/// Earth radius in miles for haversine distance
const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Bonus when the point falls inside a boundary
const BONUS_WITHIN: f64 = 0.3;
/// Bonus when the point falls within twice the closest boundary's radius
const BONUS_NEAR: f64 = 0.2;
/// Bonus for any other valid location
const BONUS_REMOTE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    City,
    Neighborhood,
    Region,
}

/// A named geographic circle used for location trust
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityBoundary {
    pub id: String,
    pub name: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius_miles: f64,
    pub boundary_type: BoundaryType,
}

/// Result of a boundary membership check
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryMatch {
    pub is_within: bool,
    pub community: Option<CommunityBoundary>,
    pub distance_miles: Option<f64>,
}

/// A location bonus with its human-readable reason
#[derive(Debug, Clone, Serialize)]
pub struct LocationBonus {
    pub bonus: f64,
    pub reason: String,
}

/// Reverse-geocoded place details, supplied by an external provider and
/// used only to enrich signal metadata, never by the distance math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodedPlace {
    pub city: String,
    pub formatted_address: String,
}

/// External geocoding provider seam
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, lat: f64, lng: f64) -> Result<GeocodedPlace>;
}

/// Great-circle distance in miles
pub fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_MILES * c
}

fn validate_coords(lat: f64, lng: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GateError::BadRequest(format!("Latitude out of range: {lat}")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(GateError::BadRequest(format!("Longitude out of range: {lng}")));
    }
    Ok(())
}

/// In-memory index over the static boundary set
pub struct BoundaryIndex {
    boundaries: Vec<CommunityBoundary>,
}

impl BoundaryIndex {
    pub fn new(boundaries: Vec<CommunityBoundary>) -> Self {
        Self { boundaries }
    }

    /// Default reference set for the launch communities
    pub fn seeded() -> Self {
        Self::new(vec![
            CommunityBoundary {
                id: "downtown-sf".into(),
                name: "Downtown San Francisco".into(),
                center_lat: 37.7879,
                center_lng: -122.4074,
                radius_miles: 1.0,
                boundary_type: BoundaryType::Neighborhood,
            },
            CommunityBoundary {
                id: "mission-district".into(),
                name: "Mission District".into(),
                center_lat: 37.7599,
                center_lng: -122.4148,
                radius_miles: 1.5,
                boundary_type: BoundaryType::Neighborhood,
            },
            CommunityBoundary {
                id: "san-francisco".into(),
                name: "San Francisco".into(),
                center_lat: 37.7749,
                center_lng: -122.4194,
                radius_miles: 7.0,
                boundary_type: BoundaryType::City,
            },
            CommunityBoundary {
                id: "sf-bay-area".into(),
                name: "San Francisco Bay Area".into(),
                center_lat: 37.7749,
                center_lng: -122.4194,
                radius_miles: 30.0,
                boundary_type: BoundaryType::Region,
            },
        ])
    }

    pub fn boundaries(&self) -> &[CommunityBoundary] {
        &self.boundaries
    }

    /// Check whether a point falls inside any boundary. Among all matches
    /// the smallest radius wins; a point at exactly the radius counts as
    /// within.
    pub fn is_within(&self, lat: f64, lng: f64) -> Result<BoundaryMatch> {
        validate_coords(lat, lng)?;

        let best = self
            .boundaries
            .iter()
            .filter_map(|b| {
                let distance = haversine_miles(lat, lng, b.center_lat, b.center_lng);
                (distance <= b.radius_miles).then_some((b, distance))
            })
            .min_by(|(a, _), (b, _)| {
                a.radius_miles
                    .partial_cmp(&b.radius_miles)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        Ok(match best {
            Some((boundary, distance)) => BoundaryMatch {
                is_within: true,
                community: Some(boundary.clone()),
                distance_miles: Some(distance),
            },
            None => BoundaryMatch {
                is_within: false,
                community: None,
                distance_miles: None,
            },
        })
    }

    /// Unconditional nearest boundary by center distance
    pub fn closest(&self, lat: f64, lng: f64) -> Result<Option<(CommunityBoundary, f64)>> {
        validate_coords(lat, lng)?;

        Ok(self
            .boundaries
            .iter()
            .map(|b| {
                let distance = haversine_miles(lat, lng, b.center_lat, b.center_lng);
                (b.clone(), distance)
            })
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)))
    }

    /// Geographic trust bonus for a submitted location: 0.3 inside a
    /// boundary, 0.2 within twice the closest boundary's radius, 0.1
    /// anywhere else valid.
    pub fn location_bonus(&self, lat: f64, lng: f64) -> Result<LocationBonus> {
        let matched = self.is_within(lat, lng)?;
        if let Some(community) = matched.community {
            return Ok(LocationBonus {
                bonus: BONUS_WITHIN,
                reason: format!("Located within {}", community.name),
            });
        }

        if let Some((closest, distance)) = self.closest(lat, lng)? {
            if distance <= closest.radius_miles * 2.0 {
                return Ok(LocationBonus {
                    bonus: BONUS_NEAR,
                    reason: format!("Near {}", closest.name),
                });
            }
        }

        Ok(LocationBonus {
            bonus: BONUS_REMOTE,
            reason: "Location verified".to_string(),
        })
    }
}
