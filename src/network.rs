//! # Trail Network
//!
//! Loads named GeoJSON line-string resources into a [`TrailNetwork`].
//!
//! Every source line-string becomes its own [`TrailSegment`]. Segments are
//! never concatenated across resources or across line-strings of one
//! resource: joining physically disconnected branches would create shortcut
//! edges and false on-trail hits.
//!
//! Loading fails open. A missing or unparseable resource is logged, recorded
//! in a [`ResourceReport`], and contributes no segments; if nothing loads the
//! result is an empty network against which every point is off trail.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailMatchError};
use crate::geo_utils::search_window;
use crate::{Bounds, GeoPoint, TrailSegment};

// ============================================================================
// Edge index
// ============================================================================

/// One vertex pair of a trail segment, indexed by its lat/lon envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailEdge {
    pub segment_index: usize,
    pub edge_index: usize,
    pub start: GeoPoint,
    pub end: GeoPoint,
}

impl RTreeObject for TrailEdge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.start.longitude, self.start.latitude],
            [self.end.longitude, self.end.latitude],
        )
    }
}

/// Outcome of loading one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub name: String,
    pub segments_loaded: usize,
    pub error: Option<String>,
}

// ============================================================================
// Trail Network
// ============================================================================

/// Immutable set of independent trail segments with a spatial edge index.
///
/// Built once per process or batch and shared read-only (typically behind an
/// `Arc`) by every activity being matched.
pub struct TrailNetwork {
    segments: Vec<TrailSegment>,
    edge_index: RTree<TrailEdge>,
    bounds: Option<Bounds>,
    reports: Vec<ResourceReport>,
}

impl fmt::Debug for TrailNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrailNetwork")
            .field("segments", &self.segments.len())
            .field("edges", &self.edge_index.size())
            .field("bounds", &self.bounds)
            .field("reports", &self.reports)
            .finish()
    }
}

impl TrailNetwork {
    /// Build a network from segments. Each segment is split at invalid
    /// points, and runs shorter than two points are dropped.
    pub fn new(segments: Vec<TrailSegment>) -> Self {
        Self::with_reports(segments, Vec::new())
    }

    /// A network with no segments. Every point classifies off trail.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn with_reports(segments: Vec<TrailSegment>, reports: Vec<ResourceReport>) -> Self {
        let segments: Vec<TrailSegment> = segments
            .into_iter()
            .flat_map(|s| valid_runs(s.into_iter().map(Some)))
            .collect();

        let edges: Vec<TrailEdge> = segments
            .iter()
            .enumerate()
            .flat_map(|(segment_index, segment)| {
                segment
                    .windows(2)
                    .enumerate()
                    .map(move |(edge_index, w)| TrailEdge {
                        segment_index,
                        edge_index,
                        start: w[0],
                        end: w[1],
                    })
            })
            .collect();

        let bounds = segments
            .iter()
            .filter_map(|s| Bounds::from_points(s))
            .reduce(|a, b| a.union(&b));

        Self {
            segments,
            edge_index: RTree::bulk_load(edges),
            bounds,
            reports,
        }
    }

    /// Load named resources from in-memory GeoJSON strings, in order.
    ///
    /// A resource that fails to parse is skipped with a warning.
    pub fn from_resources<'a, I>(resources: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::assemble(
            resources
                .into_iter()
                .map(|(name, contents)| (name.to_string(), parse_resource(name, contents)))
                .collect(),
        )
    }

    /// Load `names` from `dir`. Missing or unreadable files are skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P, names: &[String]) -> Self {
        let dir = dir.as_ref();
        Self::assemble(
            names
                .iter()
                .map(|name| {
                    let path = dir.join(name);
                    let parsed = fs::read_to_string(&path)
                        .map_err(|e| TrailMatchError::NetworkResource {
                            name: name.clone(),
                            message: format!("{}: {}", path.display(), e),
                        })
                        .and_then(|text| parse_resource(name, &text));
                    (name.clone(), parsed)
                })
                .collect(),
        )
    }

    fn assemble(results: Vec<(String, Result<Vec<TrailSegment>>)>) -> Self {
        let mut segments = Vec::new();
        let mut reports = Vec::with_capacity(results.len());

        for (name, parsed) in results {
            match parsed {
                Ok(parsed) => {
                    info!("[TrailNetwork] Loaded {} segments from {}", parsed.len(), name);
                    reports.push(ResourceReport {
                        name,
                        segments_loaded: parsed.len(),
                        error: None,
                    });
                    segments.extend(parsed);
                }
                Err(e) => {
                    warn!("[TrailNetwork] {}", e);
                    reports.push(ResourceReport {
                        name,
                        segments_loaded: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let network = Self::with_reports(segments, reports);
        if network.is_empty() {
            warn!(
                "[TrailNetwork] No trail segments loaded; all activities will match as off trail"
            );
        }
        network
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn segments(&self) -> &[TrailSegment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn reports(&self) -> &[ResourceReport] {
        &self.reports
    }

    /// Every edge in (segment, edge) order.
    pub fn edges(&self) -> impl Iterator<Item = TrailEdge> + '_ {
        self.segments
            .iter()
            .enumerate()
            .flat_map(|(segment_index, segment)| {
                segment
                    .windows(2)
                    .enumerate()
                    .map(move |(edge_index, w)| TrailEdge {
                        segment_index,
                        edge_index,
                        start: w[0],
                        end: w[1],
                    })
            })
    }

    /// Edges that could lie within `radius_meters` of `point`.
    ///
    /// A superset of the true hits: an edge left out is guaranteed to be
    /// farther than `radius_meters`. Falls back to every edge when no
    /// bounded search window exists.
    pub fn candidate_edges(&self, point: &GeoPoint, radius_meters: f64) -> Vec<&TrailEdge> {
        match search_window(point, radius_meters) {
            Some(window) => self
                .edge_index
                .locate_in_envelope_intersecting(&window)
                .collect(),
            None => self.edge_index.iter().collect(),
        }
    }
}

// ============================================================================
// GeoJSON parsing
// ============================================================================

/// The subset of GeoJSON the loader understands. Unknown object types
/// deserialize to `Unsupported` and are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonObject {
    FeatureCollection {
        #[serde(default)]
        features: Vec<GeoJsonObject>,
    },
    Feature {
        #[serde(default)]
        geometry: Option<Box<GeoJsonObject>>,
    },
    GeometryCollection {
        #[serde(default)]
        geometries: Vec<GeoJsonObject>,
    },
    LineString {
        coordinates: Vec<Vec<f64>>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    #[serde(other)]
    Unsupported,
}

/// Parse one GeoJSON resource into independent segments.
///
/// Coordinates are `[lon, lat, ...]` per GeoJSON and are transposed to
/// [`GeoPoint`] (lat, lon). Line-strings with fewer than two usable
/// positions are dropped.
pub fn parse_resource(name: &str, contents: &str) -> Result<Vec<TrailSegment>> {
    let object: GeoJsonObject =
        serde_json::from_str(contents).map_err(|e| TrailMatchError::NetworkResource {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    let mut segments = Vec::new();
    collect_segments(&object, &mut segments);
    debug!("[TrailNetwork] Parsed {} line-strings from {}", segments.len(), name);
    Ok(segments)
}

fn collect_segments(object: &GeoJsonObject, out: &mut Vec<TrailSegment>) {
    match object {
        GeoJsonObject::FeatureCollection { features } => {
            for feature in features {
                collect_segments(feature, out);
            }
        }
        GeoJsonObject::Feature { geometry } => {
            if let Some(geometry) = geometry {
                collect_segments(geometry, out);
            }
        }
        GeoJsonObject::GeometryCollection { geometries } => {
            for geometry in geometries {
                collect_segments(geometry, out);
            }
        }
        GeoJsonObject::LineString { coordinates } => push_line(coordinates, out),
        GeoJsonObject::MultiLineString { coordinates } => {
            for line in coordinates {
                push_line(line, out);
            }
        }
        GeoJsonObject::Unsupported => {}
    }
}

fn push_line(coordinates: &[Vec<f64>], out: &mut Vec<TrailSegment>) {
    let points = coordinates.iter().map(|position| match position.as_slice() {
        [lon, lat, ..] => Some(GeoPoint::new(*lat, *lon)),
        _ => None,
    });
    out.extend(valid_runs(points));
}

/// Split a line at every missing or invalid position. Its neighbours are
/// never joined, so no edge exists that the source data doesn't have.
fn valid_runs<I>(points: I) -> Vec<TrailSegment>
where
    I: IntoIterator<Item = Option<GeoPoint>>,
{
    let mut runs = Vec::new();
    let mut current: TrailSegment = Vec::new();

    for point in points {
        match point.filter(GeoPoint::is_valid) {
            Some(p) => current.push(p),
            None => {
                if current.len() >= 2 {
                    runs.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() >= 2 {
        runs.push(current);
    }

    runs
}

// ============================================================================
// Network cache
// ============================================================================

type Fingerprint = Option<(u64, SystemTime)>;

fn fingerprint(path: &Path) -> Fingerprint {
    let meta = fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

/// Keeps the loaded network for a trail data directory and reloads it only
/// when one of its resource files changes.
#[derive(Debug)]
pub struct NetworkCache {
    dir: PathBuf,
    names: Vec<String>,
    fingerprints: Vec<Fingerprint>,
    network: Arc<TrailNetwork>,
}

impl NetworkCache {
    /// Load the network from `dir` immediately.
    pub fn open<P: Into<PathBuf>>(dir: P, names: Vec<String>) -> Self {
        let dir = dir.into();
        let fingerprints = names.iter().map(|n| fingerprint(&dir.join(n))).collect();
        let network = Arc::new(TrailNetwork::load_dir(&dir, &names));
        Self {
            dir,
            names,
            fingerprints,
            network,
        }
    }

    /// Shared handle to the current network.
    pub fn network(&self) -> Arc<TrailNetwork> {
        Arc::clone(&self.network)
    }

    /// Reload if any resource file changed (appeared, vanished, or differs
    /// in size or mtime). Returns whether a reload happened.
    pub fn refresh(&mut self) -> bool {
        let current: Vec<Fingerprint> = self
            .names
            .iter()
            .map(|n| fingerprint(&self.dir.join(n)))
            .collect();

        if current == self.fingerprints {
            return false;
        }

        info!("[TrailNetwork] Trail resources changed in {}, reloading", self.dir.display());
        self.network = Arc::new(TrailNetwork::load_dir(&self.dir, &self.names));
        self.fingerprints = current;
        true
    }
}
