//! Activity and match result storage.
//!
//! The [`MatchStore`] trait is the only place match results are written.
//! [`InMemoryMatchStore`] backs tests and embedding callers; the SQLite
//! implementation lives in [`crate::persistence`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailMatchError};
use crate::track::ActivityTrack;
use crate::{ActivityMetadata, MatchResult};

/// One stored activity: identity, raw track, scalars and its match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub athlete_id: i64,
    #[serde(default)]
    pub name: String,
    /// Encoded polyline; activities without GPS have none
    #[serde(default)]
    pub polyline: Option<String>,
    #[serde(flatten)]
    pub metadata: ActivityMetadata,
    #[serde(default)]
    pub match_result: MatchResult,
}

impl ActivityRecord {
    /// A freshly ingested, unmatched activity.
    pub fn new(
        id: i64,
        athlete_id: i64,
        polyline: Option<String>,
        metadata: ActivityMetadata,
    ) -> Self {
        Self {
            id,
            athlete_id,
            name: String::new(),
            polyline,
            metadata,
            match_result: MatchResult::unmatched(),
        }
    }

    /// Decode the polyline into a matchable track.
    pub fn to_track(&self, precision: u32) -> Result<ActivityTrack> {
        let encoded = self
            .polyline
            .as_deref()
            .ok_or_else(|| TrailMatchError::InvalidPolyline {
                activity_id: self.id,
                message: "no polyline".to_string(),
            })?;
        ActivityTrack::from_polyline(self.id, encoded, self.metadata.clone(), precision)
    }
}

/// Which activities a bulk recalculation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecalculationScope {
    /// Only this athlete's activities
    pub athlete_id: Option<i64>,
    /// Only activities starting at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl RecalculationScope {
    /// Every stored activity.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_athlete(athlete_id: i64) -> Self {
        Self {
            athlete_id: Some(athlete_id),
            since: None,
        }
    }

    pub fn contains(&self, record: &ActivityRecord) -> bool {
        self.athlete_id.map_or(true, |a| record.athlete_id == a)
            && self.since.map_or(true, |s| record.metadata.start_date >= s)
    }
}

/// Storage for activities and their match results.
///
/// Listing methods return ids newest first (start date descending, then id
/// descending).
pub trait MatchStore {
    /// Insert or update an activity's identity, polyline and scalars. A new
    /// activity starts unmatched; an existing one keeps its match result.
    fn upsert_activity(&mut self, record: &ActivityRecord) -> Result<()>;

    fn get_activity(&self, id: i64) -> Result<Option<ActivityRecord>>;

    /// Up to `limit` activities that have never been matched or were reset.
    fn unmatched_activity_ids(&self, limit: usize) -> Result<Vec<i64>>;

    fn activity_ids(&self, scope: &RecalculationScope) -> Result<Vec<i64>>;

    /// Replace the stored match result. Fails with `ActivityNotFound`.
    fn write_match_result(&mut self, id: i64, result: &MatchResult) -> Result<()>;

    /// Clear one activity back to unmatched. Returns whether it exists.
    fn reset_activity(&mut self, id: i64) -> Result<bool>;

    /// Clear every matched activity of an athlete. Returns how many changed.
    fn reset_athlete(&mut self, athlete_id: i64) -> Result<usize>;

    fn activity_count(&self) -> Result<usize>;
}

/// Map-backed store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMatchStore {
    activities: BTreeMap<i64, ActivityRecord>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn newest_first<'a, I>(records: I) -> Vec<i64>
    where
        I: Iterator<Item = &'a ActivityRecord>,
    {
        let mut records: Vec<&ActivityRecord> = records.collect();
        records.sort_by(|a, b| {
            b.metadata
                .start_date
                .cmp(&a.metadata.start_date)
                .then(b.id.cmp(&a.id))
        });
        records.into_iter().map(|r| r.id).collect()
    }
}

impl MatchStore for InMemoryMatchStore {
    fn upsert_activity(&mut self, record: &ActivityRecord) -> Result<()> {
        let match_result = self
            .activities
            .get(&record.id)
            .map(|existing| existing.match_result)
            .unwrap_or_default();
        self.activities.insert(
            record.id,
            ActivityRecord {
                match_result,
                ..record.clone()
            },
        );
        Ok(())
    }

    fn get_activity(&self, id: i64) -> Result<Option<ActivityRecord>> {
        Ok(self.activities.get(&id).cloned())
    }

    fn unmatched_activity_ids(&self, limit: usize) -> Result<Vec<i64>> {
        let mut ids = Self::newest_first(
            self.activities
                .values()
                .filter(|r| !r.match_result.is_matched()),
        );
        ids.truncate(limit);
        Ok(ids)
    }

    fn activity_ids(&self, scope: &RecalculationScope) -> Result<Vec<i64>> {
        Ok(Self::newest_first(
            self.activities.values().filter(|r| scope.contains(r)),
        ))
    }

    fn write_match_result(&mut self, id: i64, result: &MatchResult) -> Result<()> {
        let record = self
            .activities
            .get_mut(&id)
            .ok_or(TrailMatchError::ActivityNotFound { activity_id: id })?;
        record.match_result = *result;
        Ok(())
    }

    fn reset_activity(&mut self, id: i64) -> Result<bool> {
        match self.activities.get_mut(&id) {
            Some(record) => {
                record.match_result = MatchResult::unmatched();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reset_athlete(&mut self, athlete_id: i64) -> Result<usize> {
        let mut changed = 0;
        for record in self
            .activities
            .values_mut()
            .filter(|r| r.athlete_id == athlete_id && r.match_result != MatchResult::unmatched())
        {
            record.match_result = MatchResult::unmatched();
            changed += 1;
        }
        Ok(changed)
    }

    fn activity_count(&self) -> Result<usize> {
        Ok(self.activities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, athlete_id: i64, day: u32) -> ActivityRecord {
        let mut metadata = ActivityMetadata::with_distance(1000.0, 300);
        metadata.start_date = Utc.with_ymd_and_hms(2026, 1, day, 8, 0, 0).unwrap();
        ActivityRecord::new(id, athlete_id, Some("_p~iF~ps|U_ulLnnqC".to_string()), metadata)
    }

    fn matched() -> MatchResult {
        MatchResult {
            distance_on_trail: Some(500.0),
            time_on_trail: Some(150.0),
            last_matched: Some(Utc::now()),
        }
    }

    #[test]
    fn test_upsert_preserves_match_result() {
        let mut store = InMemoryMatchStore::new();
        store.upsert_activity(&record(1, 7, 1)).unwrap();
        store.write_match_result(1, &matched()).unwrap();

        let mut renamed = record(1, 7, 1);
        renamed.name = "Morning Run".to_string();
        store.upsert_activity(&renamed).unwrap();

        let stored = store.get_activity(1).unwrap().unwrap();
        assert_eq!(stored.name, "Morning Run");
        assert!(stored.match_result.is_matched());
    }

    #[test]
    fn test_unmatched_newest_first_with_limit() {
        let mut store = InMemoryMatchStore::new();
        for (id, day) in [(1, 3), (2, 5), (3, 4), (4, 6)] {
            store.upsert_activity(&record(id, 7, day)).unwrap();
        }
        store.write_match_result(4, &matched()).unwrap();

        assert_eq!(store.unmatched_activity_ids(10).unwrap(), vec![2, 3, 1]);
        assert_eq!(store.unmatched_activity_ids(2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_scope_filters() {
        let mut store = InMemoryMatchStore::new();
        store.upsert_activity(&record(1, 7, 1)).unwrap();
        store.upsert_activity(&record(2, 8, 2)).unwrap();
        store.upsert_activity(&record(3, 7, 3)).unwrap();

        assert_eq!(store.activity_ids(&RecalculationScope::all()).unwrap(), vec![3, 2, 1]);
        assert_eq!(store.activity_ids(&RecalculationScope::for_athlete(7)).unwrap(), vec![3, 1]);

        let since = RecalculationScope {
            athlete_id: None,
            since: Some(Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap()),
        };
        assert_eq!(store.activity_ids(&since).unwrap(), vec![3, 2]);
    }

    #[test]
    fn test_resets() {
        let mut store = InMemoryMatchStore::new();
        store.upsert_activity(&record(1, 7, 1)).unwrap();
        store.upsert_activity(&record(2, 7, 2)).unwrap();
        store.upsert_activity(&record(3, 8, 3)).unwrap();
        for id in 1..=3 {
            store.write_match_result(id, &matched()).unwrap();
        }

        assert!(store.reset_activity(1).unwrap());
        assert!(!store.reset_activity(99).unwrap());
        assert_eq!(store.get_activity(1).unwrap().unwrap().match_result, MatchResult::unmatched());

        assert_eq!(store.reset_athlete(7).unwrap(), 1);
        assert!(store.get_activity(3).unwrap().unwrap().match_result.is_matched());
    }

    #[test]
    fn test_write_to_missing_activity() {
        let mut store = InMemoryMatchStore::new();
        let err = store.write_match_result(5, &matched()).unwrap_err();
        assert!(matches!(err, TrailMatchError::ActivityNotFound { activity_id: 5 }));
    }

    #[test]
    fn test_missing_polyline_is_skippable() {
        let mut r = record(1, 7, 1);
        r.polyline = None;
        assert!(r.to_track(5).unwrap_err().is_skippable());
    }
}
