//! # Trail Matcher
//!
//! Measures how much of a recorded GPS activity overlaps a trail network.
//!
//! This library provides:
//! - Trail network loading from named GeoJSON line-string resources
//! - Per-point on/off trail classification within a distance tolerance
//! - On-trail distance/time aggregation and renderable route segments
//! - An idempotent matched/unmatched lifecycle per activity, with resets
//!   and bulk recalculation
//!
//! ## Features
//!
//! - **`persistence`** - SQLite match store (default)
//! - **`parallel`** - Enable parallel bulk recalculation with rayon
//! - **`http`** - Enable HTTP client for trail geometry downloads
//! - **`cli`** - Build the `trailmatch` operator binary
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trail_matcher::{GeoPoint, MatchConfig, TrailNetwork, classify, aggregate, ActivityMetadata};
//!
//! let network = TrailNetwork::new(vec![vec![
//!     GeoPoint::new(34.8500, -82.4000),
//!     GeoPoint::new(34.8600, -82.4000),
//! ]]);
//!
//! let track = vec![
//!     GeoPoint::new(34.8510, -82.4001),
//!     GeoPoint::new(34.8590, -82.4001),
//! ];
//!
//! let classified = classify(&track, &network, MatchConfig::default().tolerance_meters);
//! assert!(classified.iter().all(|p| p.is_on_trail));
//!
//! let metadata = ActivityMetadata::with_distance(900.0, 300);
//! let totals = aggregate(&classified, &metadata);
//! assert!(totals.distance_on_trail > 800.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrailMatchError};

// Geographic primitives (haversine, point-to-segment distance, bounds)
pub mod geo_utils;

// Activity tracks decoded from encoded polylines
pub mod track;
pub use track::ActivityTrack;

// Trail network loading and edge index
pub mod network;
pub use network::{NetworkCache, ResourceReport, TrailEdge, TrailNetwork};

// Per-point on/off trail classification
pub mod classify;
pub use classify::{classify, classify_with_mode, ClassifyMode};

// Renderable segment grouping
pub mod grouping;
pub use grouping::group;

// On-trail distance/time aggregation
pub mod aggregate;
pub use aggregate::{aggregate, TimeAllocation, TrailAggregate};

// Pure per-activity pipeline and its render/diagnostic outputs
pub mod matcher;
pub use matcher::{
    match_track, MatchDiagnostics, PointDiagnostic, RouteVisualization, TrailMatch,
};

// Engine configuration (file + environment)
pub mod config;
pub use config::{EngineConfig, TrailSource};

// Match result storage
pub mod store;
pub use store::{ActivityRecord, InMemoryMatchStore, MatchStore, RecalculationScope};

#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteMatchStore;

// Match lifecycle controller
pub mod lifecycle;
pub use lifecycle::{BatchSummary, MatchController, MatchOutcome, RecalculationReport};

// HTTP module for trail data fetching
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{FetchResult, TrailDataFetcher};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in decimal degrees.
///
/// # Example
/// ```
/// use trail_matcher::GeoPoint;
/// let point = GeoPoint::new(34.8526, -82.3940); // Greenville, SC
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// `[lat, lon]` pair as used in rendered segment coordinates.
    pub fn to_lat_lon(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

/// One trail line-string. Never joined to any other segment.
pub type TrailSegment = Vec<GeoPoint>;

/// Bounding box for a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Smallest bounds containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    /// Whether the two boxes share any point (touching edges count).
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
            && self.min_lng <= other.max_lng
            && other.min_lng <= self.max_lng
    }
}

/// Scalar activity fields that travel alongside the encoded polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    /// Recorded distance in meters
    pub distance: f64,
    /// Moving time in seconds
    pub moving_time: u32,
    /// Elapsed time in seconds
    pub elapsed_time: u32,
    /// Activity type (e.g., "Run", "Ride")
    pub activity_type: String,
    /// Activity start (UTC)
    pub start_date: DateTime<Utc>,
}

impl ActivityMetadata {
    /// Metadata with only distance and moving time set; handy for pure
    /// pipeline use where type and start date don't matter.
    pub fn with_distance(distance: f64, moving_time: u32) -> Self {
        Self {
            distance,
            moving_time,
            elapsed_time: moving_time,
            activity_type: "Run".to_string(),
            start_date: DateTime::<Utc>::default(),
        }
    }
}

/// A track point with its on/off trail classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedPoint {
    pub point: GeoPoint,
    pub is_on_trail: bool,
    /// Smallest distance seen to the network. Global minimum only in
    /// diagnostics mode; `None` when no trail edge was evaluated.
    pub min_distance_meters: Option<f64>,
    /// Segment that produced `min_distance_meters` (diagnostic only)
    pub nearest_segment_index: Option<usize>,
}

impl ClassifiedPoint {
    /// A point classified off-trail without any distance evaluation.
    pub fn off_trail(point: GeoPoint) -> Self {
        Self {
            point,
            is_on_trail: false,
            min_distance_meters: None,
            nearest_segment_index: None,
        }
    }
}

/// A contiguous run of track points sharing one classification, for map
/// rendering. Adjacent segments share their boundary point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailMatchSegment {
    /// `[lat, lon]` pairs
    pub coordinates: Vec<[f64; 2]>,
    pub is_on_trail: bool,
    /// Length of the edges that originate inside this segment, in meters
    pub distance_meters: f64,
    /// Moving time allocated to those edges, in seconds
    pub time_seconds: f64,
}

/// Persisted outcome of one pipeline run for one activity.
///
/// All three fields are `None` while the activity is unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Meters on trail
    pub distance_on_trail: Option<f64>,
    /// Seconds on trail
    pub time_on_trail: Option<f64>,
    /// When the aggregates were written
    pub last_matched: Option<DateTime<Utc>>,
}

impl MatchResult {
    /// The null state every activity starts in.
    pub fn unmatched() -> Self {
        Self::default()
    }

    /// A populated result for the given aggregate.
    pub fn matched(aggregate: &TrailAggregate, matched_at: DateTime<Utc>) -> Self {
        Self {
            distance_on_trail: Some(aggregate.distance_on_trail),
            time_on_trail: Some(aggregate.time_on_trail),
            last_matched: Some(matched_at),
        }
    }

    pub fn state(&self) -> MatchState {
        if self.last_matched.is_some() {
            MatchState::Matched
        } else {
            MatchState::Unmatched
        }
    }

    pub fn is_matched(&self) -> bool {
        self.state() == MatchState::Matched
    }
}

/// Lifecycle state of an activity's match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchState {
    Unmatched,
    Matched,
}

/// Configuration for the per-activity matching pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum lateral distance (meters) for a point to count as on trail.
    /// Default: 50.0
    pub tolerance_meters: f64,

    /// Track the true nearest trail segment for every point.
    /// Slower; classification is identical either way. Default: false
    pub collect_diagnostics: bool,

    /// Maximum activities claimed by one scheduled matching pass.
    /// Default: 10
    pub batch_size: u32,

    /// Encoded polyline precision (decimal digits). Default: 5
    pub polyline_precision: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance_meters: 50.0,
            collect_diagnostics: false,
            batch_size: 10,
            polyline_precision: 5,
        }
    }
}

impl MatchConfig {
    /// Classification mode implied by `collect_diagnostics`.
    pub fn classify_mode(&self) -> ClassifyMode {
        if self.collect_diagnostics {
            ClassifyMode::Diagnostics
        } else {
            ClassifyMode::FirstHit
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(34.8526, -82.3940).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_bounds() {
        let points = vec![
            GeoPoint::new(34.85, -82.40),
            GeoPoint::new(34.87, -82.38),
            GeoPoint::new(34.86, -82.41),
        ];
        let bounds = Bounds::from_points(&points).unwrap();
        assert_eq!(bounds.min_lat, 34.85);
        assert_eq!(bounds.max_lat, 34.87);
        assert_eq!(bounds.min_lng, -82.41);
        assert_eq!(bounds.max_lng, -82.38);
        assert!(Bounds::from_points(&[]).is_none());
    }

    #[test]
    fn test_match_result_states() {
        let unmatched = MatchResult::unmatched();
        assert_eq!(unmatched.state(), MatchState::Unmatched);
        assert!(unmatched.distance_on_trail.is_none());

        let aggregate = TrailAggregate {
            distance_on_trail: 1200.0,
            time_on_trail: 360.0,
            track_distance: 2000.0,
            points_on_trail: 10,
        };
        let matched = MatchResult::matched(&aggregate, Utc::now());
        assert!(matched.is_matched());
        assert_eq!(matched.distance_on_trail, Some(1200.0));
        assert_eq!(matched.time_on_trail, Some(360.0));
    }

    #[test]
    fn test_match_config_defaults() {
        let config = MatchConfig::default();
        assert_eq!(config.tolerance_meters, 50.0);
        assert_eq!(config.classify_mode(), ClassifyMode::FirstHit);

        let config: MatchConfig = serde_json::from_str(r#"{"collect_diagnostics": true}"#).unwrap();
        assert_eq!(config.classify_mode(), ClassifyMode::Diagnostics);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_segment_serializes_camel_case() {
        let segment = TrailMatchSegment {
            coordinates: vec![[34.85, -82.40]],
            is_on_trail: true,
            distance_meters: 0.0,
            time_seconds: 0.0,
        };
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"isOnTrail\":true"));
        assert!(json.contains("\"coordinates\":[[34.85,-82.4]]"));
    }
}
