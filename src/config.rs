//! Engine configuration: a JSON file, then environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailMatchError};
use crate::store::RecalculationScope;
use crate::MatchConfig;

/// A named trail geometry resource and where to download it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailSource {
    /// File name inside `trail_data_dir`
    pub name: String,
    pub url: String,
}

/// Everything needed to run the match engine outside of tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the trail GeoJSON resources
    pub trail_data_dir: PathBuf,
    /// Resources loaded from `trail_data_dir`, in order
    pub resource_names: Vec<String>,
    /// SQLite database with activities and match results
    pub database_path: PathBuf,
    pub match_config: MatchConfig,
    /// Lower bound on start date for bulk recalculation
    pub recalculate_since: Option<DateTime<Utc>>,
    pub trail_sources: Vec<TrailSource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trail_data_dir: PathBuf::from("trail_data"),
            resource_names: vec!["main.geojson".to_string(), "spurs.geojson".to_string()],
            database_path: PathBuf::from("trail_matcher.db"),
            match_config: MatchConfig::default(),
            recalculate_since: None,
            trail_sources: vec![
                TrailSource {
                    name: "main.geojson".to_string(),
                    url: "https://greenvilleopenmap.info/SwampRabbitWays.geojson".to_string(),
                },
                TrailSource {
                    name: "spurs.geojson".to_string(),
                    url: "https://greenvilleopenmap.info/SwampRabbitConnectors.geojson".to_string(),
                },
            ],
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| TrailMatchError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let mut config = Self::from_file(path)?;
                config.apply_overrides(|key| env::var(key).ok())?;
                config
            }
            None => Self::from_env()?,
        };
        info!(
            "[EngineConfig] trail data {}, database {}, tolerance {} m",
            config.trail_data_dir.display(),
            config.database_path.display(),
            config.match_config.tolerance_meters
        );
        Ok(config)
    }

    /// Apply `TRAIL_DATA_DIR`, `TRAIL_TOLERANCE_METERS`, `MATCH_BATCH_SIZE`,
    /// `MATCH_DB_PATH` and `RECALC_START_DATE` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TRAIL_DATA_DIR") {
            self.trail_data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("TRAIL_TOLERANCE_METERS") {
            self.match_config.tolerance_meters = parse_value("TRAIL_TOLERANCE_METERS", &raw)?;
        }
        if let Some(raw) = lookup("MATCH_BATCH_SIZE") {
            self.match_config.batch_size = parse_value("MATCH_BATCH_SIZE", &raw)?;
        }
        if let Some(path) = lookup("MATCH_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("RECALC_START_DATE") {
            self.recalculate_since = Some(parse_since(&raw)?);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let tolerance = self.match_config.tolerance_meters;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(TrailMatchError::Config {
                message: format!(
                    "tolerance_meters must be a non-negative number, got {}",
                    tolerance
                ),
            });
        }
        if self.match_config.batch_size == 0 {
            return Err(TrailMatchError::Config {
                message: "batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Scope for a configured bulk recalculation (all athletes).
    pub fn recalculation_scope(&self) -> RecalculationScope {
        RecalculationScope {
            athlete_id: None,
            since: self.recalculate_since,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| TrailMatchError::Config {
        message: format!("{}={:?}: {}", key, raw, e),
    })
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| TrailMatchError::Config {
            message: format!("invalid date {:?}, expected RFC 3339 or YYYY-MM-DD", raw),
        })
}
