//! Unified error handling for the trail-matcher library.
//!
//! Only genuinely unexpected conditions travel as `Err`. Degraded trail
//! resources and undecodable activities are turned into outcomes by the
//! loader and the lifecycle controller; see [`TrailMatchError::is_skippable`].

use thiserror::Error;

/// Unified error type for trail-matcher operations.
#[derive(Debug, Error)]
pub enum TrailMatchError {
    /// Track has insufficient points for matching
    #[error("Activity {activity_id} has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        activity_id: i64,
        point_count: usize,
        minimum_required: usize,
    },

    /// Polyline is missing or cannot be decoded
    #[error("Activity {activity_id} has an undecodable polyline: {message}")]
    InvalidPolyline { activity_id: i64, message: String },

    /// Track decoded but contains coordinates outside WGS84 range
    #[error("Activity {activity_id} has invalid coordinates: {message}")]
    InvalidCoordinates { activity_id: i64, message: String },

    /// A named trail geometry resource could not be read or parsed
    #[error("Trail resource '{name}' could not be loaded: {message}")]
    NetworkResource { name: String, message: String },

    /// No activity with this id in the store
    #[error("Activity {activity_id} not found")]
    ActivityNotFound { activity_id: i64 },

    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// HTTP error while fetching trail data
    #[error(
        "HTTP error{}: {message}",
        .status_code.map(|c| format!(" ({})", c)).unwrap_or_default()
    )]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrailMatchError {
    /// Errors that mean "skip this activity and leave it unmatched" rather
    /// than "the operation failed".
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TrailMatchError::InsufficientPoints { .. }
                | TrailMatchError::InvalidPolyline { .. }
                | TrailMatchError::InvalidCoordinates { .. }
        )
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrailMatchError {
    fn from(err: rusqlite::Error) -> Self {
        TrailMatchError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrailMatchError {
    fn from(err: serde_json::Error) -> Self {
        TrailMatchError::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias for trail-matcher operations.
pub type Result<T> = std::result::Result<T, TrailMatchError>;

/// Extension trait for converting Option to TrailMatchError.
pub trait OptionExt<T> {
    /// Convert Option to Result with activity-not-found error.
    fn ok_or_not_found(self, activity_id: i64) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, activity_id: i64) -> Result<T> {
        self.ok_or(TrailMatchError::ActivityNotFound { activity_id })
    }
}
