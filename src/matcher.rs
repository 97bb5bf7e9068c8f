//! The pure per-activity pipeline: classify, aggregate, and on demand group
//! and explain.
//!
//! Nothing here touches storage. Given the same track, network and
//! configuration, [`match_track`] returns identical output every time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, TimeAllocation, TrailAggregate};
use crate::classify::{classify_with_mode, ClassifyMode};
use crate::grouping::group;
use crate::network::TrailNetwork;
use crate::track::ActivityTrack;
use crate::{ClassifiedPoint, MatchConfig, MatchResult, TrailMatchSegment};

/// Output of one pipeline run for one activity.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailMatch {
    pub activity_id: i64,
    pub tolerance: f64,
    pub mode: ClassifyMode,
    pub classified: Vec<ClassifiedPoint>,
    pub aggregate: TrailAggregate,
    allocation: TimeAllocation,
}

/// Run classification and aggregation for one activity.
pub fn match_track(
    track: &ActivityTrack,
    network: &TrailNetwork,
    config: &MatchConfig,
) -> TrailMatch {
    let mode = config.classify_mode();
    let classified = classify_with_mode(&track.points, network, config.tolerance_meters, mode);
    let allocation = TimeAllocation::for_track(&classified, &track.metadata);
    let aggregate = aggregate(&classified, &track.metadata);

    TrailMatch {
        activity_id: track.activity_id,
        tolerance: config.tolerance_meters,
        mode,
        classified,
        aggregate,
        allocation,
    }
}

impl TrailMatch {
    /// The value to persist for this run.
    pub fn to_match_result(&self, matched_at: DateTime<Utc>) -> MatchResult {
        MatchResult::matched(&self.aggregate, matched_at)
    }

    /// Renderable segments, with the same time allocation as the aggregate.
    pub fn segments(&self) -> Vec<TrailMatchSegment> {
        group(&self.classified, &self.allocation)
    }

    /// Per-point explanation of the classification.
    pub fn diagnostics(&self) -> MatchDiagnostics {
        let points_on_trail = self.classified.iter().filter(|c| c.is_on_trail).count();
        MatchDiagnostics {
            total_points: self.classified.len(),
            points_on_trail,
            points_off_trail: self.classified.len() - points_on_trail,
            tolerance: self.tolerance,
            per_point: self
                .classified
                .iter()
                .enumerate()
                .map(|(index, c)| PointDiagnostic {
                    index,
                    lat: c.point.latitude,
                    lon: c.point.longitude,
                    is_on_trail: c.is_on_trail,
                    min_distance: c.min_distance_meters,
                    nearest_segment_index: c.nearest_segment_index,
                })
                .collect(),
        }
    }

    /// Segments plus, when `debug` is set, the diagnostic payload.
    pub fn visualization(&self, debug: bool) -> RouteVisualization {
        RouteVisualization {
            activity_id: self.activity_id,
            segments: self.segments(),
            totals: self.aggregate,
            diagnostics: debug.then(|| self.diagnostics()),
        }
    }
}

/// Debug payload describing how every point was classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDiagnostics {
    pub total_points: usize,
    pub points_on_trail: usize,
    pub points_off_trail: usize,
    pub tolerance: f64,
    pub per_point: Vec<PointDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDiagnostic {
    pub index: usize,
    pub lat: f64,
    pub lon: f64,
    pub is_on_trail: bool,
    pub min_distance: Option<f64>,
    pub nearest_segment_index: Option<usize>,
}

/// On-demand map payload for one activity. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteVisualization {
    pub activity_id: i64,
    pub segments: Vec<TrailMatchSegment>,
    pub totals: TrailAggregate,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diagnostics: Option<MatchDiagnostics>,
}
