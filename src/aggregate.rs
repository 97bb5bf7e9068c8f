//! On-trail distance and time aggregation.
//!
//! Works strictly on the classified point sequence: edge `i → i+1` counts
//! toward the on-trail totals when point `i` is on trail. The rendered
//! segments from [`crate::grouping`] duplicate boundary points and are never
//! fed back in here.

use serde::{Deserialize, Serialize};

use crate::geo_utils::haversine_distance;
use crate::{ActivityMetadata, ClassifiedPoint};

/// Per-edge share of the activity's moving time.
///
/// Each edge carries `moving_time × edge_length / track_length` seconds.
/// With no track length or no moving time every edge carries zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAllocation {
    seconds_per_meter: f64,
}

impl TimeAllocation {
    /// Spread `moving_time` seconds over `track_length` meters.
    pub fn proportional(moving_time: u32, track_length: f64) -> Self {
        let seconds_per_meter = if track_length > 0.0 && track_length.is_finite() {
            f64::from(moving_time) / track_length
        } else {
            0.0
        };
        Self { seconds_per_meter }
    }

    /// Allocation for a classified track and its activity metadata.
    pub fn for_track(classified: &[ClassifiedPoint], metadata: &ActivityMetadata) -> Self {
        Self::proportional(metadata.moving_time, track_length(classified))
    }

    /// No time attributed anywhere.
    pub fn none() -> Self {
        Self {
            seconds_per_meter: 0.0,
        }
    }

    /// Seconds allocated to an edge of `edge_length` meters.
    #[inline]
    pub fn edge_time(&self, edge_length: f64) -> f64 {
        edge_length * self.seconds_per_meter
    }
}

/// Scalar result of one aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailAggregate {
    /// Meters on trail, clamped to the activity's recorded distance
    pub distance_on_trail: f64,
    /// Seconds on trail
    pub time_on_trail: f64,
    /// Length of the decoded track in meters
    pub track_distance: f64,
    pub points_on_trail: usize,
}

/// Sum on-trail distance and time for a classified track.
///
/// Always yields numbers, never `None`: a track with no on-trail points (or
/// an empty network) aggregates to zero.
pub fn aggregate(classified: &[ClassifiedPoint], metadata: &ActivityMetadata) -> TrailAggregate {
    let allocation = TimeAllocation::for_track(classified, metadata);

    let mut track_distance = 0.0;
    let mut raw_on_trail = 0.0;
    let mut time_on_trail = 0.0;

    for w in classified.windows(2) {
        let edge = haversine_distance(&w[0].point, &w[1].point);
        track_distance += edge;
        if w[0].is_on_trail {
            raw_on_trail += edge;
            time_on_trail += allocation.edge_time(edge);
        }
    }

    // Never more than the device's recorded distance, even when that is zero
    let distance_on_trail = raw_on_trail.min(metadata.distance.max(0.0));

    TrailAggregate {
        distance_on_trail,
        time_on_trail: time_on_trail.min(f64::from(metadata.moving_time)),
        track_distance,
        points_on_trail: classified.iter().filter(|c| c.is_on_trail).count(),
    }
}

fn track_length(classified: &[ClassifiedPoint]) -> f64 {
    classified
        .windows(2)
        .map(|w| haversine_distance(&w[0].point, &w[1].point))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeoPoint;

    fn point(lat: f64, on: bool) -> ClassifiedPoint {
        ClassifiedPoint {
            point: GeoPoint::new(lat, -82.40),
            is_on_trail: on,
            min_distance_meters: None,
            nearest_segment_index: None,
        }
    }

    #[test]
    fn test_edges_count_by_originating_point() {
        // Three equal edges; only the edge out of the on-trail point counts
        let classified = vec![
            point(34.850, false),
            point(34.851, true),
            point(34.852, false),
            point(34.853, false),
        ];
        let edge = haversine_distance(&classified[0].point, &classified[1].point);
        let totals = aggregate(&classified, &ActivityMetadata::with_distance(10_000.0, 300));

        assert!((totals.distance_on_trail - edge).abs() < 1e-6);
        assert!((totals.track_distance - 3.0 * edge).abs() < 1e-6);
        assert!((totals.time_on_trail - 100.0).abs() < 1e-6);
        assert_eq!(totals.points_on_trail, 1);
    }

    #[test]
    fn test_last_point_contributes_nothing() {
        let classified = vec![point(34.850, false), point(34.851, true)];
        let totals = aggregate(&classified, &ActivityMetadata::with_distance(500.0, 60));
        assert_eq!(totals.distance_on_trail, 0.0);
        assert_eq!(totals.time_on_trail, 0.0);
        assert_eq!(totals.points_on_trail, 1);
    }

    #[test]
    fn test_distance_clamped_to_recorded_distance() {
        let classified = vec![point(34.850, true), point(34.860, true)];
        let totals = aggregate(&classified, &ActivityMetadata::with_distance(1000.0, 600));
        assert!(totals.track_distance > 1100.0);
        assert_eq!(totals.distance_on_trail, 1000.0);
        assert!((totals.time_on_trail - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_recorded_distance_clamps_to_zero() {
        let classified = vec![point(34.850, true), point(34.860, true)];
        let totals = aggregate(&classified, &ActivityMetadata::with_distance(0.0, 100));
        assert!(totals.track_distance > 1000.0);
        assert_eq!(totals.distance_on_trail, 0.0);

        let totals = aggregate(&classified, &ActivityMetadata::with_distance(-5.0, 100));
        assert_eq!(totals.distance_on_trail, 0.0);
    }

    #[test]
    fn test_zero_on_trail_is_zero_not_missing() {
        let classified = vec![point(34.850, false), point(34.851, false)];
        let totals = aggregate(&classified, &ActivityMetadata::with_distance(100.0, 60));
        assert_eq!(totals.distance_on_trail, 0.0);
        assert_eq!(totals.time_on_trail, 0.0);

        let totals = aggregate(&[], &ActivityMetadata::with_distance(100.0, 60));
        assert_eq!(totals.track_distance, 0.0);
    }

    #[test]
    fn test_time_allocation_edge_cases() {
        assert_eq!(TimeAllocation::proportional(100, 0.0).edge_time(50.0), 0.0);
        assert_eq!(TimeAllocation::proportional(100, f64::NAN).edge_time(50.0), 0.0);
        assert_eq!(TimeAllocation::none().edge_time(50.0), 0.0);
        assert!((TimeAllocation::proportional(100, 200.0).edge_time(50.0) - 25.0).abs() < 1e-12);
    }
}
