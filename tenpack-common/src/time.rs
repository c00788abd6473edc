//! Timestamp utilities and week boundary calculation
//!
//! Every competition query is scoped to a calendar week running from Monday
//! 00:00:00.000 to Sunday 23:59:59.999. All arithmetic is done in calendar days
//! on UTC instants; no timezone conversion is performed.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Encode a timestamp as epoch milliseconds (database representation)
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Decode epoch milliseconds read from the database
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::InvalidInput(format!("Timestamp out of range: {} ms", millis)))
}

/// Calendar week window, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekBounds {
    /// Monday 00:00:00.000
    pub start: DateTime<Utc>,
    /// Sunday 23:59:59.999
    pub end: DateTime<Utc>,
}

impl WeekBounds {
    /// True when `instant` falls inside the week
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// True once `now` is past the last millisecond of the week
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end
    }

    /// Bounds of the week immediately before this one
    pub fn previous(&self) -> WeekBounds {
        week_bounds(self.start - Duration::days(7))
    }
}

/// Compute the week containing `date`
///
/// A Sunday belongs to the week that started six days earlier, never the one
/// starting the next day.
pub fn week_bounds(date: DateTime<Utc>) -> WeekBounds {
    let days_from_monday = i64::from(date.weekday().num_days_from_monday());
    let monday = date.date_naive() - Duration::days(days_from_monday);
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(7) - Duration::milliseconds(1);

    WeekBounds { start, end }
}

/// Bounds of the week containing the current instant
pub fn current_week_bounds() -> WeekBounds {
    week_bounds(now())
}

/// True when `instant` falls in the current week
pub fn is_within_current_week(instant: DateTime<Utc>) -> bool {
    current_week_bounds().contains(instant)
}

/// Start of the week before the current one
pub fn previous_week_start() -> DateTime<Utc> {
    current_week_bounds().start - Duration::days(7)
}
