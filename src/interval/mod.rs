//! Time interval algebra
//!
//! Everything that reasons about time coverage is built on three types:
//! - [`Interval`]: a half-open `[start, end)` pair of UTC instants
//! - [`SimplifiedIntervalList`]: an ordered list of intervals that never touch
//!   or overlap, closed under union, intersection and subtraction
//! - [`Granularity`]: calendar-aligned buckets used to slice and widen intervals

mod granularity;
mod list;

pub use granularity::Granularity;
pub use list::SimplifiedIntervalList;

use crate::{Error, Result};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Half-open time range `[start, end)`
///
/// Ordering is by start, then end, which is the order every list in this
/// crate keeps its intervals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    /// Create an interval, rejecting `end < start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(Error::Query(format!(
                "interval end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Build from millisecond epoch bounds
    pub fn from_millis(start_ms: i64, end_ms: i64) -> Result<Self> {
        let start = DateTime::from_timestamp_millis(start_ms)
            .ok_or_else(|| Error::Query(format!("timestamp out of range: {start_ms}")))?;
        let end = DateTime::from_timestamp_millis(end_ms)
            .ok_or_else(|| Error::Query(format!("timestamp out of range: {end_ms}")))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// True when `other` lies entirely inside this interval
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True when the two intervals share at least one instant
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when one interval ends exactly where the other starts
    pub fn abuts(&self, other: &Interval) -> bool {
        self.end == other.start || other.end == self.start
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Smallest interval covering both
    pub fn span(&self, other: &Interval) -> Interval {
        Interval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Copy of this interval with the start raised to `floor` (clamped to the end)
    pub fn with_floor(&self, floor: DateTime<Utc>) -> Interval {
        let start = self.start.max(floor).min(self.end);
        Interval {
            start,
            end: self.end,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (start, end) = value.trim().split_once('/').ok_or_else(|| {
            Error::Query(format!("interval '{value}' must be formatted as start/end"))
        })?;
        let start = DateTime::parse_from_rfc3339(start.trim())
            .map_err(|e| Error::Query(format!("invalid interval start '{start}': {e}")))?;
        let end = DateTime::parse_from_rfc3339(end.trim())
            .map_err(|e| Error::Query(format!("invalid interval end '{end}': {e}")))?;
        Self::new(start.with_timezone(&Utc), end.with_timezone(&Utc))
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn test_interval(start: &str, end: &str) -> Interval {
    format!("{start}T00:00:00Z/{end}T00:00:00Z").parse().unwrap()
}
