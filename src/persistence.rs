//! # SQLite Match Store
//!
//! Durable [`MatchStore`] backed by a single `activities` table. Each match
//! result is three nullable columns on the activity row, so writing or
//! clearing one is a single-row `UPDATE` and commits atomically.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text, which keeps
//! `ORDER BY start_date` and `start_date >= ?` correct as plain string
//! comparisons.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TrailMatchError};
use crate::store::{ActivityRecord, MatchStore, RecalculationScope};
use crate::{ActivityMetadata, MatchResult};

const ACTIVITY_COLUMNS: &str = "id, athlete_id, name, polyline, distance, moving_time, \
     elapsed_time, activity_type, start_date, distance_on_trail, time_on_trail, last_matched";

/// Match store persisted in a SQLite database file.
pub struct SqliteMatchStore {
    db: Connection,
}

impl SqliteMatchStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref())?;
        Self::init_schema(&db)?;
        info!("[MatchStore] Opened {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY,
                athlete_id INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                polyline TEXT,
                distance REAL NOT NULL,
                moving_time INTEGER NOT NULL,
                elapsed_time INTEGER NOT NULL,
                activity_type TEXT NOT NULL,
                start_date TEXT NOT NULL,
                -- Match result: all NULL while unmatched
                distance_on_trail REAL,
                time_on_trail REAL,
                last_matched TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_activities_athlete ON activities(athlete_id);
            CREATE INDEX IF NOT EXISTS idx_activities_unmatched
                ON activities(last_matched, start_date);
            CREATE INDEX IF NOT EXISTS idx_activities_start ON activities(start_date);
        "#,
        )
    }

    fn read_record(row: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
        let start_date: String = row.get(8)?;
        let last_matched: Option<String> = row.get(11)?;

        Ok(ActivityRecord {
            id: row.get(0)?,
            athlete_id: row.get(1)?,
            name: row.get(2)?,
            polyline: row.get(3)?,
            metadata: ActivityMetadata {
                distance: row.get(4)?,
                moving_time: row.get(5)?,
                elapsed_time: row.get(6)?,
                activity_type: row.get(7)?,
                start_date: parse_timestamp(8, &start_date)?,
            },
            match_result: MatchResult {
                distance_on_trail: row.get(9)?,
                time_on_trail: row.get(10)?,
                last_matched: last_matched
                    .as_deref()
                    .map(|ts| parse_timestamp(11, ts))
                    .transpose()?,
            },
        })
    }

    fn collect_ids(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<i64>> {
        let mut stmt = self.db.prepare(sql)?;
        let ids = stmt
            .query_map(params, |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

impl MatchStore for SqliteMatchStore {
    fn upsert_activity(&mut self, record: &ActivityRecord) -> Result<()> {
        // Match columns are left out of the update so re-ingesting an
        // activity keeps its result.
        self.db.execute(
            "INSERT INTO activities (id, athlete_id, name, polyline, distance, moving_time,
                                     elapsed_time, activity_type, start_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                athlete_id = excluded.athlete_id,
                name = excluded.name,
                polyline = excluded.polyline,
                distance = excluded.distance,
                moving_time = excluded.moving_time,
                elapsed_time = excluded.elapsed_time,
                activity_type = excluded.activity_type,
                start_date = excluded.start_date",
            params![
                record.id,
                record.athlete_id,
                record.name,
                record.polyline,
                record.metadata.distance,
                record.metadata.moving_time,
                record.metadata.elapsed_time,
                record.metadata.activity_type,
                format_timestamp(&record.metadata.start_date),
            ],
        )?;
        debug!("[MatchStore] Upserted activity {}", record.id);
        Ok(())
    }

    fn get_activity(&self, id: i64) -> Result<Option<ActivityRecord>> {
        let sql = format!("SELECT {} FROM activities WHERE id = ?", ACTIVITY_COLUMNS);
        let record = self
            .db
            .query_row(&sql, params![id], Self::read_record)
            .optional()?;
        Ok(record)
    }

    fn unmatched_activity_ids(&self, limit: usize) -> Result<Vec<i64>> {
        self.collect_ids(
            "SELECT id FROM activities WHERE last_matched IS NULL
             ORDER BY start_date DESC, id DESC LIMIT ?",
            params![i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    fn activity_ids(&self, scope: &RecalculationScope) -> Result<Vec<i64>> {
        self.collect_ids(
            "SELECT id FROM activities
             WHERE (?1 IS NULL OR athlete_id = ?1)
               AND (?2 IS NULL OR start_date >= ?2)
             ORDER BY start_date DESC, id DESC",
            params![scope.athlete_id, scope.since.as_ref().map(format_timestamp)],
        )
    }

    fn write_match_result(&mut self, id: i64, result: &MatchResult) -> Result<()> {
        let updated = self.db.execute(
            "UPDATE activities SET distance_on_trail = ?2, time_on_trail = ?3, last_matched = ?4
             WHERE id = ?1",
            params![
                id,
                result.distance_on_trail,
                result.time_on_trail,
                result.last_matched.as_ref().map(format_timestamp),
            ],
        )?;
        if updated == 0 {
            return Err(TrailMatchError::ActivityNotFound { activity_id: id });
        }
        Ok(())
    }

    fn reset_activity(&mut self, id: i64) -> Result<bool> {
        let updated = self.db.execute(
            "UPDATE activities
             SET distance_on_trail = NULL, time_on_trail = NULL, last_matched = NULL
             WHERE id = ?",
            params![id],
        )?;
        Ok(updated > 0)
    }

    fn reset_athlete(&mut self, athlete_id: i64) -> Result<usize> {
        let updated = self.db.execute(
            "UPDATE activities
             SET distance_on_trail = NULL, time_on_trail = NULL, last_matched = NULL
             WHERE athlete_id = ?
               AND (last_matched IS NOT NULL
                    OR distance_on_trail IS NOT NULL
                    OR time_on_trail IS NOT NULL)",
            params![athlete_id],
        )?;
        Ok(updated)
    }

    fn activity_count(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, athlete_id: i64, day: u32) -> ActivityRecord {
        let mut metadata = ActivityMetadata::with_distance(1500.0, 420);
        metadata.start_date = Utc.with_ymd_and_hms(2026, 2, day, 7, 30, 0).unwrap();
        metadata.activity_type = "Ride".to_string();
        ActivityRecord::new(id, athlete_id, Some("_p~iF~ps|U_ulLnnqC".to_string()), metadata)
    }

    fn matched() -> MatchResult {
        MatchResult {
            distance_on_trail: Some(750.5),
            time_on_trail: Some(210.25),
            last_matched: Some(Utc::now()),
        }
    }

    #[test]
    fn test_round_trip_record() {
        let mut store = SqliteMatchStore::in_memory().unwrap();
        let mut original = record(1, 7, 3);
        original.name = "Lunch Ride".to_string();
        store.upsert_activity(&original).unwrap();

        let loaded = store.get_activity(1).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.get_activity(2).unwrap().is_none());
        assert_eq!(store.activity_count().unwrap(), 1);
    }

    #[test]
    fn test_match_result_persists_and_survives_upsert() {
        let mut store = SqliteMatchStore::in_memory().unwrap();
        store.upsert_activity(&record(1, 7, 3)).unwrap();
        let result = matched();
        store.write_match_result(1, &result).unwrap();

        store.upsert_activity(&record(1, 7, 3)).unwrap();
        let loaded = store.get_activity(1).unwrap().unwrap();
        assert_eq!(loaded.match_result, result);
        assert!(store.unmatched_activity_ids(10).unwrap().is_empty());
    }

    #[test]
    fn test_ordering_and_scopes() {
        let mut store = SqliteMatchStore::in_memory().unwrap();
        for (id, athlete, day) in [(1, 7, 1), (2, 8, 4), (3, 7, 2), (4, 7, 4)] {
            store.upsert_activity(&record(id, athlete, day)).unwrap();
        }

        assert_eq!(store.unmatched_activity_ids(3).unwrap(), vec![4, 2, 3]);
        assert_eq!(store.activity_ids(&RecalculationScope::for_athlete(7)).unwrap(), vec![4, 3, 1]);

        let scope = RecalculationScope {
            athlete_id: Some(7),
            since: Some(Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap()),
        };
        assert_eq!(store.activity_ids(&scope).unwrap(), vec![4, 3]);
    }

    #[test]
    fn test_resets_clear_all_fields() {
        let mut store = SqliteMatchStore::in_memory().unwrap();
        store.upsert_activity(&record(1, 7, 1)).unwrap();
        store.upsert_activity(&record(2, 7, 2)).unwrap();
        store.upsert_activity(&record(3, 9, 2)).unwrap();
        for id in 1..=3 {
            store.write_match_result(id, &matched()).unwrap();
        }

        assert!(store.reset_activity(3).unwrap());
        assert_eq!(store.get_activity(3).unwrap().unwrap().match_result, MatchResult::unmatched());

        assert_eq!(store.reset_athlete(7).unwrap(), 2);
        assert_eq!(store.reset_athlete(7).unwrap(), 0);
        assert_eq!(store.unmatched_activity_ids(10).unwrap().len(), 3);
    }

    #[test]
    fn test_write_to_missing_activity() {
        let mut store = SqliteMatchStore::in_memory().unwrap();
        assert!(matches!(
            store.write_match_result(42, &matched()),
            Err(TrailMatchError::ActivityNotFound { activity_id: 42 })
        ));
        assert!(!store.reset_activity(42).unwrap());
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.db");
        {
            let mut store = SqliteMatchStore::open(&path).unwrap();
            store.upsert_activity(&record(1, 7, 1)).unwrap();
            store.write_match_result(1, &matched()).unwrap();
        }
        let store = SqliteMatchStore::open(&path).unwrap();
        assert!(store.get_activity(1).unwrap().unwrap().match_result.is_matched());
    }
}
