//! # Match Lifecycle
//!
//! [`MatchController`] is the only writer of match results. It moves
//! activities between the two states
//!
//! ```text
//!   ingest ──► UNMATCHED ──match──► MATCHED
//!                  ▲                   │
//!                  └──────reset────────┘
//! ```
//!
//! and drives scheduled passes and bulk recalculation over a shared,
//! read-only [`TrailNetwork`].
//!
//! Activities whose polyline cannot be decoded (or has fewer than two
//! points) are skipped: they stay unmatched and are picked up again by the
//! next pass. In batches, per-activity problems are counted, never raised.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{OptionExt, Result, TrailMatchError};
use crate::matcher::{match_track, RouteVisualization, TrailMatch};
use crate::network::TrailNetwork;
use crate::store::{ActivityRecord, MatchStore, RecalculationScope};
use crate::track::ActivityTrack;
use crate::{MatchConfig, MatchResult};

/// Result of attempting to match one activity.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Aggregates written; the activity is now MATCHED.
    Matched(MatchResult),
    /// Track unusable; the activity is left unmatched.
    Skipped { reason: String },
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// Summary of one scheduled pass over unmatched activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Unmatched activities claimed by the pass
    pub found: usize,
    pub matched: usize,
    /// Undecodable or too short; still unmatched
    pub skipped: usize,
    /// Storage errors while reading or writing
    pub failed: usize,
}

/// Summary of a bulk recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecalculationReport {
    /// Activities recomputed and written
    pub processed: usize,
    /// Activities that could not be recomputed, for any reason
    pub failed: usize,
    /// Wall time in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct Tally {
    matched: usize,
    skipped: usize,
    failed: usize,
}

/// Owns match state transitions for every activity in a [`MatchStore`].
pub struct MatchController<S: MatchStore> {
    store: S,
    network: Arc<TrailNetwork>,
    config: MatchConfig,
}

impl<S: MatchStore> MatchController<S> {
    pub fn new(store: S, network: Arc<TrailNetwork>, config: MatchConfig) -> Self {
        Self {
            store,
            network,
            config,
        }
    }

    /// Controller over `store` with the network loaded from the configured
    /// trail data directory.
    pub fn from_config(store: S, config: &EngineConfig) -> Self {
        let network = TrailNetwork::load_dir(&config.trail_data_dir, &config.resource_names);
        Self::new(store, Arc::new(network), config.match_config.clone())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn network(&self) -> Arc<TrailNetwork> {
        Arc::clone(&self.network)
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Swap in a reloaded network. Existing results are not invalidated;
    /// call [`MatchController::recalculate`] to bring them up to date.
    pub fn replace_network(&mut self, network: Arc<TrailNetwork>) {
        info!(
            "[MatchController] Trail network replaced ({} segments)",
            network.segment_count()
        );
        self.network = network;
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Store a new or updated activity. New activities start unmatched.
    pub fn ingest(&mut self, record: &ActivityRecord) -> Result<()> {
        self.store.upsert_activity(record)?;
        debug!("[MatchController] Ingested activity {}", record.id);
        Ok(())
    }

    /// Match one activity now, whatever its current state.
    pub fn match_activity(&mut self, id: i64) -> Result<MatchOutcome> {
        let record = self.store.get_activity(id)?.ok_or_not_found(id)?;

        let track = match record.to_track(self.config.polyline_precision) {
            Ok(track) => track,
            Err(e) if e.is_skippable() => {
                warn!("[MatchController] Skipping activity {}: {}", id, e);
                if record.match_result.is_matched() {
                    self.store.reset_activity(id)?;
                }
                return Ok(MatchOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        let result = match_track(&track, &self.network, &self.config).to_match_result(Utc::now());
        self.store.write_match_result(id, &result)?;
        debug!(
            "[MatchController] Activity {} matched: {:.1} m on trail",
            id,
            result.distance_on_trail.unwrap_or_default()
        );
        Ok(MatchOutcome::Matched(result))
    }

    /// Scheduled pass: match up to `batch_size` unmatched activities,
    /// newest first.
    pub fn match_unmatched(&mut self) -> Result<BatchSummary> {
        let ids = self
            .store
            .unmatched_activity_ids(self.config.batch_size as usize)?;
        let tally = self.run_batch(&ids);

        let summary = BatchSummary {
            found: ids.len(),
            matched: tally.matched,
            skipped: tally.skipped,
            failed: tally.failed,
        };
        info!(
            "[MatchController] Matched {}/{} unmatched activities ({} skipped, {} failed)",
            summary.matched, summary.found, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Clear one activity back to unmatched.
    pub fn reset_activity(&mut self, id: i64) -> Result<()> {
        if !self.store.reset_activity(id)? {
            return Err(TrailMatchError::ActivityNotFound { activity_id: id });
        }
        info!("[MatchController] Reset activity {}", id);
        Ok(())
    }

    /// Clear every matched activity of an athlete. Returns how many changed.
    pub fn reset_athlete(&mut self, athlete_id: i64) -> Result<usize> {
        let count = self.store.reset_athlete(athlete_id)?;
        info!("[MatchController] Reset {} activities for athlete {}", count, athlete_id);
        Ok(count)
    }

    /// Recompute every activity in `scope` against the current network.
    ///
    /// Only a failure to list the scope is an error. Each activity is
    /// independent: undecodable tracks and storage errors are counted in
    /// `failed`. An undecodable activity that still carries an older result
    /// goes back to unmatched.
    pub fn recalculate(&mut self, scope: &RecalculationScope) -> Result<RecalculationReport> {
        let started = Instant::now();
        let ids = self.store.activity_ids(scope)?;
        info!("[MatchController] Recalculating {} activities", ids.len());

        let tally = self.run_batch(&ids);
        let report = RecalculationReport {
            processed: tally.matched,
            failed: tally.skipped + tally.failed,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "[MatchController] Recalculation done: {} processed, {} failed in {} ms",
            report.processed, report.failed, report.duration_ms
        );
        Ok(report)
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Recompute the classification of one activity for display. Nothing is
    /// written. With `debug`, the full diagnostic payload is included.
    pub fn render(&self, id: i64, debug: bool) -> Result<RouteVisualization> {
        let record = self.store.get_activity(id)?.ok_or_not_found(id)?;
        let track = record.to_track(self.config.polyline_precision)?;
        let config = MatchConfig {
            collect_diagnostics: debug || self.config.collect_diagnostics,
            ..self.config.clone()
        };
        Ok(match_track(&track, &self.network, &config).visualization(debug))
    }

    // ========================================================================
    // Batch processing
    // ========================================================================

    /// Load, match and write `ids`. Loading and writing go through the store
    /// one at a time; matching runs in parallel with the `parallel` feature.
    fn run_batch(&mut self, ids: &[i64]) -> Tally {
        let mut tally = Tally::default();
        let mut tracks: Vec<ActivityTrack> = Vec::with_capacity(ids.len());

        for &id in ids {
            match self.store.get_activity(id) {
                Ok(Some(record)) => match record.to_track(self.config.polyline_precision) {
                    Ok(track) => tracks.push(track),
                    Err(e) if e.is_skippable() => {
                        warn!("[MatchController] Skipping activity {}: {}", id, e);
                        if record.match_result.is_matched() {
                            self.clear_stale_result(id);
                        }
                        tally.skipped += 1;
                    }
                    Err(e) => {
                        warn!("[MatchController] Activity {} failed: {}", id, e);
                        tally.failed += 1;
                    }
                },
                Ok(None) => {
                    warn!("[MatchController] Activity {} disappeared during batch", id);
                    tally.failed += 1;
                }
                Err(e) => {
                    warn!("[MatchController] Could not load activity {}: {}", id, e);
                    tally.failed += 1;
                }
            }
        }

        let network = &self.network;
        let config = &self.config;

        #[cfg(feature = "parallel")]
        let matches: Vec<TrailMatch> = tracks
            .par_iter()
            .map(|track| match_track(track, network, config))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let matches: Vec<TrailMatch> = tracks
            .iter()
            .map(|track| match_track(track, network, config))
            .collect();

        let matched_at = Utc::now();
        for m in &matches {
            match self
                .store
                .write_match_result(m.activity_id, &m.to_match_result(matched_at))
            {
                Ok(()) => tally.matched += 1,
                Err(e) => {
                    warn!(
                        "[MatchController] Could not write result for activity {}: {}",
                        m.activity_id, e
                    );
                    tally.failed += 1;
                }
            }
        }

        tally
    }

    /// The stored result no longer describes the stored track.
    fn clear_stale_result(&mut self, id: i64) {
        match self.store.reset_activity(id) {
            Ok(_) => info!("[MatchController] Cleared stale result for activity {}", id),
            Err(e) => warn!("[MatchController] Could not clear activity {}: {}", id, e),
        }
    }
}
