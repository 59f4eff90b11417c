//! Calendar-aligned time grains

use super::{Interval, SimplifiedIntervalList};
use crate::Error;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time grain of a query's result buckets
///
/// `All` is the unbounded grain: every requested interval is one bucket.
/// Weeks start on Monday; all other grains align to UTC calendar boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    All,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::All => "all",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Granularity::All)
    }

    /// Start of the bucket containing `instant`
    ///
    /// For `All` the instant is returned unchanged.
    pub fn round_floor(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::All => instant,
            Granularity::Minute => floor_seconds(instant, 60),
            Granularity::Hour => floor_seconds(instant, 3_600),
            Granularity::Day => floor_seconds(instant, 86_400),
            Granularity::Week => {
                let day = floor_seconds(instant, 86_400);
                day - TimeDelta::days(day.weekday().num_days_from_monday() as i64)
            }
            Granularity::Month => utc_midnight(instant.year(), instant.month(), 1).unwrap_or(instant),
            Granularity::Quarter => {
                let month = ((instant.month() - 1) / 3) * 3 + 1;
                utc_midnight(instant.year(), month, 1).unwrap_or(instant)
            }
            Granularity::Year => utc_midnight(instant.year(), 1, 1).unwrap_or(instant),
        }
    }

    /// Start of the bucket after the one starting at `bucket_start`
    ///
    /// Returns `None` for `All` and on calendar overflow.
    pub fn next_bucket(&self, bucket_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::All => None,
            Granularity::Minute => bucket_start.checked_add_signed(TimeDelta::minutes(1)),
            Granularity::Hour => bucket_start.checked_add_signed(TimeDelta::hours(1)),
            Granularity::Day => bucket_start.checked_add_signed(TimeDelta::days(1)),
            Granularity::Week => bucket_start.checked_add_signed(TimeDelta::weeks(1)),
            Granularity::Month => bucket_start.checked_add_months(Months::new(1)),
            Granularity::Quarter => bucket_start.checked_add_months(Months::new(3)),
            Granularity::Year => bucket_start.checked_add_months(Months::new(12)),
        }
    }

    /// Slice one interval into its grain buckets, clipped to the interval
    ///
    /// `All` yields the interval itself.
    pub fn buckets(&self, interval: &Interval) -> Vec<Interval> {
        if interval.is_empty() {
            return Vec::new();
        }
        if self.is_all() {
            return vec![*interval];
        }

        let mut out = Vec::new();
        let mut cursor = self.round_floor(interval.start());
        while cursor < interval.end() {
            let Some(next) = self.next_bucket(cursor) else {
                break;
            };
            let start = cursor.max(interval.start());
            let end = next.min(interval.end());
            if start < end {
                out.push(Interval { start, end });
            }
            cursor = next;
        }
        out
    }

    /// Slice a sequence of intervals, preserving the input order
    pub fn slice<'a, I>(&self, intervals: I) -> Vec<Interval>
    where
        I: IntoIterator<Item = &'a Interval>,
    {
        intervals
            .into_iter()
            .flat_map(|interval| self.buckets(interval))
            .collect()
    }

    /// Whole, unclipped buckets touched by `interval`
    pub fn aligned_buckets(&self, interval: &Interval) -> Vec<Interval> {
        if interval.is_empty() {
            return Vec::new();
        }
        if self.is_all() {
            return vec![*interval];
        }

        let mut out = Vec::new();
        let mut cursor = self.round_floor(interval.start());
        while cursor < interval.end() {
            let Some(next) = self.next_bucket(cursor) else {
                break;
            };
            out.push(Interval {
                start: cursor,
                end: next,
            });
            cursor = next;
        }
        out
    }

    /// Widen every interval of `list` out to whole buckets
    pub fn widen(&self, list: &SimplifiedIntervalList) -> SimplifiedIntervalList {
        list.iter()
            .flat_map(|interval| self.aligned_buckets(interval))
            .collect()
    }

    /// Number of buckets spanned by the given intervals
    pub fn bucket_count<'a, I>(&self, intervals: I) -> u64
    where
        I: IntoIterator<Item = &'a Interval>,
    {
        self.slice(intervals).len() as u64
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Granularity::All),
            "minute" => Ok(Granularity::Minute),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "quarter" => Ok(Granularity::Quarter),
            "year" => Ok(Granularity::Year),
            other => Err(Error::Query(format!(
                "unknown granularity '{other}'; expected one of all, minute, hour, day, week, month, quarter, year"
            ))),
        }
    }
}

fn floor_seconds(instant: DateTime<Utc>, step: i64) -> DateTime<Utc> {
    let secs = instant.timestamp();
    let floored = secs - secs.rem_euclid(step);
    DateTime::from_timestamp(floored, 0).unwrap_or(instant)
}

fn utc_midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::test_interval as iv;

    #[test]
    fn test_daily_buckets() {
        let buckets = Granularity::Day.buckets(&iv("2020-01-01", "2020-01-04"));
        assert_eq!(
            buckets,
            vec![
                iv("2020-01-01", "2020-01-02"),
                iv("2020-01-02", "2020-01-03"),
                iv("2020-01-03", "2020-01-04"),
            ]
        );
    }

    #[test]
    fn test_all_grain_is_one_bucket() {
        let interval = iv("2020-01-01", "2020-03-01");
        assert_eq!(Granularity::All.buckets(&interval), vec![interval]);
    }

    #[test]
    fn test_buckets_are_clipped() {
        let interval: Interval = "2020-01-01T12:00:00Z/2020-01-02T06:00:00Z".parse().unwrap();
        let buckets = Granularity::Day.buckets(&interval);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start(), interval.start());
        assert_eq!(buckets[1].end(), interval.end());
    }

    #[test]
    fn test_month_and_quarter_alignment() {
        let buckets = Granularity::Month.buckets(&iv("2020-01-01", "2020-04-01"));
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[1], iv("2020-02-01", "2020-03-01"));

        let quarter = Granularity::Quarter.round_floor(iv("2020-05-17", "2020-05-18").start());
        assert_eq!(quarter, iv("2020-04-01", "2020-04-02").start());
    }

    #[test]
    fn test_week_starts_on_monday() {
        // 2020-01-01 was a Wednesday
        let floor = Granularity::Week.round_floor(iv("2020-01-01", "2020-01-02").start());
        assert_eq!(floor, iv("2019-12-30", "2019-12-31").start());
    }

    #[test]
    fn test_widen_to_whole_buckets() {
        let partial: Interval = "2020-01-01T12:00:00Z/2020-01-02T06:00:00Z".parse().unwrap();
        let widened = Granularity::Day.widen(&SimplifiedIntervalList::single(partial));
        assert_eq!(widened, SimplifiedIntervalList::single(iv("2020-01-01", "2020-01-03")));
    }

    #[test]
    fn test_parse() {
        assert_eq!("Day".parse::<Granularity>().unwrap(), Granularity::Day);
        assert!("fortnight".parse::<Granularity>().is_err());
    }
}
