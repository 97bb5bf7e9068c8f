//! Per-point on/off trail classification.
//!
//! A point is on trail when at least one trail edge lies within the
//! tolerance of it. Both modes run the same per-point evaluation and differ
//! only in which edges they feed it and whether it may stop early, so their
//! `is_on_trail` output is always identical.

use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{expand_bounds, point_to_segment_distance};
use crate::network::TrailNetwork;
use crate::track::MIN_TRACK_POINTS;
use crate::{Bounds, ClassifiedPoint, GeoPoint};

/// How much work to spend per point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifyMode {
    /// Spatially pruned candidates, stop at the first edge within tolerance.
    /// `min_distance_meters` is the smallest distance seen before stopping.
    FirstHit,
    /// Every edge in network order; records the true nearest distance and
    /// segment (lowest segment index wins ties).
    Diagnostics,
}

/// Classify every point of `track` against `network` in [`ClassifyMode::FirstHit`].
pub fn classify(
    track: &[GeoPoint],
    network: &TrailNetwork,
    tolerance: f64,
) -> Vec<ClassifiedPoint> {
    classify_with_mode(track, network, tolerance, ClassifyMode::FirstHit)
}

/// Classify every point of `track` against `network`.
///
/// Tracks with fewer than two points and empty networks classify as all off
/// trail without evaluating any distance.
pub fn classify_with_mode(
    track: &[GeoPoint],
    network: &TrailNetwork,
    tolerance: f64,
    mode: ClassifyMode,
) -> Vec<ClassifiedPoint> {
    if track.len() < MIN_TRACK_POINTS || network.is_empty() {
        return track.iter().copied().map(ClassifiedPoint::off_trail).collect();
    }

    if mode == ClassifyMode::FirstHit && !may_reach_network(track, network, tolerance) {
        debug!("[Classifier] Track is entirely outside the trail network area");
        return track.iter().copied().map(ClassifiedPoint::off_trail).collect();
    }

    #[cfg(feature = "parallel")]
    let classified: Vec<ClassifiedPoint> = track
        .par_iter()
        .map(|p| classify_point(p, network, tolerance, mode))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let classified: Vec<ClassifiedPoint> = track
        .iter()
        .map(|p| classify_point(p, network, tolerance, mode))
        .collect();

    debug!(
        "[Classifier] {} of {} points on trail (tolerance {} m, {:?})",
        classified.iter().filter(|c| c.is_on_trail).count(),
        classified.len(),
        tolerance,
        mode
    );

    classified
}

/// Classify one point. Exposed for callers that stream points.
pub fn classify_point(
    point: &GeoPoint,
    network: &TrailNetwork,
    tolerance: f64,
    mode: ClassifyMode,
) -> ClassifiedPoint {
    match mode {
        ClassifyMode::FirstHit => evaluate(
            point,
            network
                .candidate_edges(point, tolerance)
                .into_iter()
                .map(|e| (e.segment_index, e.start, e.end)),
            tolerance,
            mode,
        ),
        ClassifyMode::Diagnostics => evaluate(
            point,
            network.edges().map(|e| (e.segment_index, e.start, e.end)),
            tolerance,
            mode,
        ),
    }
}

/// The single evaluation both modes share.
fn evaluate<I>(point: &GeoPoint, edges: I, tolerance: f64, mode: ClassifyMode) -> ClassifiedPoint
where
    I: Iterator<Item = (usize, GeoPoint, GeoPoint)>,
{
    let mut is_on_trail = false;
    let mut best: Option<(f64, usize)> = None;

    for (segment_index, start, end) in edges {
        let d = point_to_segment_distance(point, &start, &end);

        // Strict `<` keeps the earliest (lowest-index) segment on ties
        if best.map_or(true, |(min, _)| d < min) {
            best = Some((d, segment_index));
        }

        if d <= tolerance {
            is_on_trail = true;
            if mode == ClassifyMode::FirstHit {
                break;
            }
        }
    }

    ClassifiedPoint {
        point: *point,
        is_on_trail,
        min_distance_meters: best.map(|(d, _)| d),
        nearest_segment_index: match mode {
            ClassifyMode::Diagnostics => best.map(|(_, s)| s),
            ClassifyMode::FirstHit => None,
        },
    }
}

/// False only when no track point can be within `tolerance` of any trail
/// point. Inconclusive cases (no bounds, poles, antimeridian) return true.
fn may_reach_network(track: &[GeoPoint], network: &TrailNetwork, tolerance: f64) -> bool {
    let (Some(track_bounds), Some(network_bounds)) = (Bounds::from_points(track), network.bounds())
    else {
        return true;
    };

    match expand_bounds(&track_bounds, tolerance) {
        Some(expanded) => expanded.intersects(&network_bounds),
        None => true,
    }
}
