//! Time windows for incremental extraction

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Datetime literal format accepted by the query language
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Lower bound used when an entity has never been checkpointed
pub fn epoch_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Render a timestamp as an unquoted query literal
pub fn format_datetime(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(DATETIME_FORMAT).to_string()
}

/// Half-open interval `[from, to)` over an entity's timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Window from the last checkpoint (or the epoch floor) up to `now`
    pub fn since(checkpoint: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self::new(checkpoint.unwrap_or_else(epoch_floor), now)
    }

    /// Check whether a timestamp falls inside the window
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.from && *timestamp < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_datetime(&self.from),
            format_datetime(&self.to)
        )
    }
}
