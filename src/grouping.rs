//! Renderable segment grouping.
//!
//! Splits a classified track into contiguous runs of equal classification.
//! At each change the transition point is written into both the closing run
//! and the new one so a map draws the route without gaps. Output is for
//! display only.

use crate::aggregate::TimeAllocation;
use crate::geo_utils::haversine_distance;
use crate::{ClassifiedPoint, TrailMatchSegment};

/// Group classified points into alternating on/off trail segments.
///
/// Each segment's `distance_meters` and `time_seconds` cover the edges that
/// originate at its own points (the duplicated boundary point belongs to
/// the following segment), so on-trail segment totals add up to exactly
/// what [`crate::aggregate::aggregate`] reports before clamping.
///
/// # Example
/// ```
/// use trail_matcher::{ClassifiedPoint, GeoPoint, TimeAllocation, group};
///
/// let classified: Vec<ClassifiedPoint> = [false, true, true, false]
///     .iter()
///     .enumerate()
///     .map(|(i, &on)| ClassifiedPoint {
///         is_on_trail: on,
///         ..ClassifiedPoint::off_trail(GeoPoint::new(34.85 + i as f64 * 0.001, -82.40))
///     })
///     .collect();
///
/// let segments = group(&classified, &TimeAllocation::none());
/// assert_eq!(segments.len(), 3);
/// assert_eq!(segments[0].coordinates.len(), 2);
/// assert_eq!(segments[1].coordinates.len(), 3);
/// assert_eq!(segments[2].coordinates.len(), 1);
/// ```
pub fn group(
    classified: &[ClassifiedPoint],
    allocation: &TimeAllocation,
) -> Vec<TrailMatchSegment> {
    let mut segments: Vec<TrailMatchSegment> = Vec::new();
    let Some(first) = classified.first() else {
        return segments;
    };

    let mut current = TrailMatchSegment {
        coordinates: vec![first.point.to_lat_lon()],
        is_on_trail: first.is_on_trail,
        distance_meters: 0.0,
        time_seconds: 0.0,
    };

    for w in classified.windows(2) {
        let (from, to) = (&w[0], &w[1]);
        let edge = haversine_distance(&from.point, &to.point);
        current.distance_meters += edge;
        current.time_seconds += allocation.edge_time(edge);
        current.coordinates.push(to.point.to_lat_lon());

        if to.is_on_trail != current.is_on_trail {
            let next = TrailMatchSegment {
                coordinates: vec![to.point.to_lat_lon()],
                is_on_trail: to.is_on_trail,
                distance_meters: 0.0,
                time_seconds: 0.0,
            };
            segments.push(std::mem::replace(&mut current, next));
        }
    }

    // A trailing single-point segment after a transition is kept: it is the
    // shared boundary point and marks where the final run begins.
    segments.push(current);
    segments
}
