//! Activity tracks decoded from compact encoded polylines.

use geo::LineString;

use crate::error::{Result, TrailMatchError};
use crate::geo_utils::polyline_length;
use crate::{ActivityMetadata, Bounds, GeoPoint};

/// Minimum number of points for a track to be matched at all.
pub const MIN_TRACK_POINTS: usize = 2;

/// Ordered GPS points of one activity plus its scalar metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityTrack {
    pub activity_id: i64,
    pub points: Vec<GeoPoint>,
    pub metadata: ActivityMetadata,
}

impl ActivityTrack {
    /// Decode a Google-encoded polyline into a track.
    ///
    /// Fails with a skippable error (see
    /// [`TrailMatchError::is_skippable`]) if the string is empty, cannot be
    /// decoded, decodes to out-of-range coordinates, or has fewer than two
    /// points.
    ///
    /// # Example
    /// ```
    /// use trail_matcher::{ActivityTrack, ActivityMetadata};
    ///
    /// // Sample from the polyline algorithm documentation
    /// let track = ActivityTrack::from_polyline(
    ///     1,
    ///     "_p~iF~ps|U_ulLnnqC_mqNvxq`@",
    ///     ActivityMetadata::with_distance(1_000_000.0, 3600),
    ///     5,
    /// ).unwrap();
    /// assert_eq!(track.points.len(), 3);
    /// assert!((track.points[0].latitude - 38.5).abs() < 1e-9);
    /// assert!((track.points[0].longitude + 120.2).abs() < 1e-9);
    /// ```
    pub fn from_polyline(
        activity_id: i64,
        encoded: &str,
        metadata: ActivityMetadata,
        precision: u32,
    ) -> Result<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(TrailMatchError::InvalidPolyline {
                activity_id,
                message: "empty polyline".to_string(),
            });
        }

        let line: LineString<f64> = polyline::decode_polyline(encoded, precision).map_err(|e| {
            TrailMatchError::InvalidPolyline {
                activity_id,
                message: e.to_string(),
            }
        })?;

        // geo coordinates are (x = lng, y = lat)
        let points: Vec<GeoPoint> = line
            .coords()
            .map(|c| GeoPoint::new(c.y, c.x))
            .collect();

        Self::from_points(activity_id, points, metadata)
    }

    /// Build a track from already-decoded points, applying the same checks
    /// as [`ActivityTrack::from_polyline`].
    pub fn from_points(
        activity_id: i64,
        points: Vec<GeoPoint>,
        metadata: ActivityMetadata,
    ) -> Result<Self> {
        if let Some(index) = points.iter().position(|p| !p.is_valid()) {
            return Err(TrailMatchError::InvalidCoordinates {
                activity_id,
                message: format!(
                    "point {} is ({}, {})",
                    index, points[index].latitude, points[index].longitude
                ),
            });
        }

        if points.len() < MIN_TRACK_POINTS {
            return Err(TrailMatchError::InsufficientPoints {
                activity_id,
                point_count: points.len(),
                minimum_required: MIN_TRACK_POINTS,
            });
        }

        Ok(Self {
            activity_id,
            points,
            metadata,
        })
    }

    /// Length of the decoded polyline in meters. Can differ from
    /// `metadata.distance`, which comes from the recording device.
    pub fn length(&self) -> f64 {
        polyline_length(&self.points)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.points)
    }
}

/// Encode points as a Google polyline. Used by tests and the CLI to produce
/// fixtures; decoding is the production path.
pub fn encode_points(points: &[GeoPoint], precision: u32) -> Result<String> {
    let line: LineString<f64> = points.iter().map(|p| (p.longitude, p.latitude)).collect();
    polyline::encode_coordinates(line, precision).map_err(|e| TrailMatchError::Internal {
        message: format!("polyline encoding failed: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ActivityMetadata {
        ActivityMetadata::with_distance(1000.0, 300)
    }

    #[test]
    fn test_decode_reference_polyline() {
        let track =
            ActivityTrack::from_polyline(1, "_p~iF~ps|U_ulLnnqC_mqNvxq`@", metadata(), 5).unwrap();
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        assert_eq!(track.points.len(), expected.len());
        for (p, (lat, lng)) in track.points.iter().zip(expected) {
            assert!((p.latitude - lat).abs() < 1e-9);
            assert!((p.longitude - lng).abs() < 1e-9);
        }
    }

    #[test]
    fn test_encode_then_decode_preserves_points() {
        let points = vec![
            GeoPoint::new(34.85261, -82.39401),
            GeoPoint::new(34.85300, -82.39500),
            GeoPoint::new(34.85411, -82.39622),
        ];
        let encoded = encode_points(&points, 5).unwrap();
        let track = ActivityTrack::from_polyline(7, &encoded, metadata(), 5).unwrap();
        for (a, b) in track.points.iter().zip(&points) {
            assert!((a.latitude - b.latitude).abs() < 1e-5);
            assert!((a.longitude - b.longitude).abs() < 1e-5);
        }
    }

    #[test]
    fn test_empty_polyline_is_skippable() {
        let err = ActivityTrack::from_polyline(3, "  ", metadata(), 5).unwrap_err();
        assert!(matches!(err, TrailMatchError::InvalidPolyline { activity_id: 3, .. }));
        assert!(err.is_skippable());
    }

    #[test]
    fn test_truncated_polyline_is_skippable() {
        // A lone continuation chunk never terminates
        let err = ActivityTrack::from_polyline(4, "_", metadata(), 5).unwrap_err();
        assert!(err.is_skippable());
    }

    #[test]
    fn test_single_point_is_insufficient() {
        let encoded = encode_points(&[GeoPoint::new(34.85, -82.39)], 5).unwrap();
        let err = ActivityTrack::from_polyline(5, &encoded, metadata(), 5).unwrap_err();
        assert!(matches!(
            err,
            TrailMatchError::InsufficientPoints {
                point_count: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let points = vec![GeoPoint::new(34.85, -82.39), GeoPoint::new(f64::NAN, 0.0)];
        let err = ActivityTrack::from_points(6, points, metadata()).unwrap_err();
        assert!(matches!(err, TrailMatchError::InvalidCoordinates { .. }));
    }
}
