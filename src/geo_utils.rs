//! # Geographic Utilities
//!
//! Distance primitives shared by the classifier, the aggregator and the
//! network edge index.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`point_to_segment_distance`] | Distance from a point to a finite trail edge |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//! | [`search_window`] | Lat/lon box guaranteed to contain every point within a radius |
//! | [`expand_bounds`] | The same guarantee for a whole bounding box |
//!
//! ## Precision
//!
//! [`point_to_segment_distance`] projects in raw latitude/longitude space and
//! only measures the final distance on the sphere. That planar projection is
//! accurate at trail scale (edges of tens to hundreds of meters) but is not a
//! geodesic projection; long edges at high latitude will pick a slightly
//! different nearest point than a true cross-track computation would.

use std::f64::consts::FRAC_PI_2;

use rstar::AABB;

use crate::{Bounds, GeoPoint};

/// Mean Earth radius in meters used by every distance in the crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two GPS points in meters.
///
/// # Example
///
/// ```rust
/// use trail_matcher::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_500.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlng = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Distance in meters from `p` to the nearest point of the finite edge `a`→`b`.
///
/// The projection parameter is computed in lat/lon space and clamped to
/// `[0, 1]`, so points beyond either end measure to that endpoint rather than
/// to the infinite line. A zero-length edge degenerates to point distance.
pub fn point_to_segment_distance(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_distance(p, &nearest_point_on_segment(p, a, b))
}

/// Nearest point of edge `a`→`b` to `p` under the planar lat/lon projection.
pub fn nearest_point_on_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> GeoPoint {
    let abx = b.longitude - a.longitude;
    let aby = b.latitude - a.latitude;
    let ab_ab = abx * abx + aby * aby;

    if ab_ab == 0.0 {
        return *a;
    }

    let apx = p.longitude - a.longitude;
    let apy = p.latitude - a.latitude;
    let t = ((apx * abx + apy * aby) / ab_ab).clamp(0.0, 1.0);

    GeoPoint::new(a.latitude + t * aby, a.longitude + t * abx)
}

/// Total length of a polyline in meters. Empty or single-point tracks are 0.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Spatial Search
// =============================================================================

/// Lat/lon envelope around `center` containing every point whose haversine
/// distance to `center` is at most `radius_meters`.
///
/// Latitude: great-circle distance is at least `R·|Δlat|`.
/// Longitude: it is at least `(2/π)·R·cos(φmax)·|Δlon|`, where `φmax` bounds
/// the absolute latitude of both points.
///
/// Returns `None` when no useful box exists (window reaches a pole or
/// crosses the antimeridian); callers must then consider everything.
pub fn search_window(center: &GeoPoint, radius_meters: f64) -> Option<AABB<[f64; 2]>> {
    if !center.is_valid() {
        return None;
    }
    let point_bounds = Bounds {
        min_lat: center.latitude,
        max_lat: center.latitude,
        min_lng: center.longitude,
        max_lng: center.longitude,
    };
    let b = expand_bounds(&point_bounds, radius_meters)?;
    Some(AABB::from_corners([b.min_lng, b.min_lat], [b.max_lng, b.max_lat]))
}

/// Grow `bounds` so it contains every point within `radius_meters` of any
/// point inside it. Same guarantees and `None` cases as [`search_window`].
pub fn expand_bounds(bounds: &Bounds, radius_meters: f64) -> Option<Bounds> {
    if !radius_meters.is_finite() || radius_meters < 0.0 {
        return None;
    }

    // Pad by a relative epsilon so boundary rounding can't exclude a hit
    let padded = radius_meters * (1.0 + 1e-9) + 1e-6;
    let lat_margin = (padded / EARTH_RADIUS_METERS).to_degrees();

    let max_abs_lat = bounds.min_lat.abs().max(bounds.max_lat.abs()) + lat_margin;
    if !max_abs_lat.is_finite() || max_abs_lat >= 90.0 {
        return None;
    }

    let cos_max = max_abs_lat.to_radians().cos();
    let lng_margin = (FRAC_PI_2 * padded / (EARTH_RADIUS_METERS * cos_max)).to_degrees();

    let min_lng = bounds.min_lng - lng_margin;
    let max_lng = bounds.max_lng + lng_margin;
    if !(min_lng >= -180.0 && max_lng <= 180.0) {
        return None;
    }

    Some(Bounds {
        min_lat: bounds.min_lat - lat_margin,
        max_lat: bounds.max_lat + lat_margin,
        min_lng,
        max_lng,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude on a 6,371 km sphere
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let expected = EARTH_RADIUS_METERS * 1.0_f64.to_radians();
        assert!((haversine_distance(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_haversine_symmetric_and_zero() {
        let a = GeoPoint::new(34.85, -82.40);
        let b = GeoPoint::new(34.86, -82.39);
        assert_eq!(haversine_distance(&a, &a), 0.0);
        assert!((haversine_distance(&a, &b) - haversine_distance(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn test_point_to_segment_perpendicular() {
        // Edge along the equator, point 0.001 deg north of its middle
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 0.01);
        let p = GeoPoint::new(0.001, 0.005);
        let expected = haversine_distance(&p, &GeoPoint::new(0.0, 0.005));
        assert!((point_to_segment_distance(&p, &a, &b) - expected).abs() < 1e-9);
        assert!((expected - 111.19).abs() < 0.1);
    }

    #[test]
    fn test_point_to_segment_clamps_to_endpoints() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 0.01);

        // Beyond b on the infinite line: distance is to b, not to the line
        let beyond = GeoPoint::new(0.0, 0.02);
        let d = point_to_segment_distance(&beyond, &a, &b);
        assert!((d - haversine_distance(&beyond, &b)).abs() < 1e-9);
        assert!(d > 1000.0);

        // Before a
        let before = GeoPoint::new(0.0005, -0.01);
        let d = point_to_segment_distance(&before, &a, &b);
        assert!((d - haversine_distance(&before, &a)).abs() < 1e-9);
    }

    #[test]
    fn test_point_to_degenerate_segment() {
        let a = GeoPoint::new(34.85, -82.40);
        let p = GeoPoint::new(34.851, -82.40);
        let d = point_to_segment_distance(&p, &a, &a);
        assert!((d - haversine_distance(&p, &a)).abs() < 1e-9);
    }

    #[test]
    fn test_polyline_length() {
        let track = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.01),
            GeoPoint::new(0.0, 0.02),
        ];
        let expected = 2.0 * haversine_distance(&track[0], &track[1]);
        assert!((polyline_length(&track) - expected).abs() < 1e-9);
        assert_eq!(polyline_length(&track[..1]), 0.0);
        assert_eq!(polyline_length(&[]), 0.0);
    }

    #[test]
    fn test_search_window_contains_radius() {
        let center = GeoPoint::new(60.0, 10.0);
        let window = search_window(&center, 50.0).unwrap();
        let lower = window.lower();
        let upper = window.upper();

        // Points exactly 50 m due north and due east must be inside
        let north_deg = (50.0 / EARTH_RADIUS_METERS).to_degrees();
        assert!(upper[1] >= center.latitude + north_deg);
        let east = GeoPoint::new(60.0, 10.0 + 0.00085);
        assert!(haversine_distance(&center, &east) < 50.0);
        assert!(upper[0] >= east.longitude);
        assert!(lower[0] <= 10.0 - 0.00085);
    }

    #[test]
    fn test_search_window_gives_up_near_poles_and_antimeridian() {
        assert!(search_window(&GeoPoint::new(89.9999, 0.0), 50.0).is_none());
        assert!(search_window(&GeoPoint::new(0.0, 179.99999), 50.0).is_none());
        assert!(search_window(&GeoPoint::new(f64::NAN, 0.0), 50.0).is_none());
    }

    #[test]
    fn test_expand_bounds_covers_corner_neighbours() {
        let bounds = Bounds {
            min_lat: 34.85,
            max_lat: 34.87,
            min_lng: -82.41,
            max_lng: -82.38,
        };
        let expanded = expand_bounds(&bounds, 100.0).unwrap();
        // 100 m north-east of the far corner
        let outside = GeoPoint::new(34.8706, -82.3793);
        assert!(haversine_distance(&outside, &GeoPoint::new(34.87, -82.38)) < 100.0);
        assert!(expanded.max_lat >= outside.latitude);
        assert!(expanded.max_lng >= outside.longitude);
        assert!(expanded.min_lat < bounds.min_lat);
        assert!(expand_bounds(&bounds, f64::NAN).is_none());
    }
}
