//! Canonical interval sequences

use super::Interval;

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Ordered sequence of intervals with no two elements touching or overlapping
///
/// Every constructor normalizes its input, so two lists covering the same
/// instants always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SimplifiedIntervalList {
    intervals: Vec<Interval>,
}

impl SimplifiedIntervalList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize an arbitrary collection of intervals
    pub fn from_intervals<I: IntoIterator<Item = Interval>>(intervals: I) -> Self {
        let mut raw: Vec<Interval> = intervals.into_iter().filter(|i| !i.is_empty()).collect();
        raw.sort();

        let mut merged: Vec<Interval> = Vec::with_capacity(raw.len());
        for interval in raw {
            match merged.last_mut() {
                // Overlapping or abutting: extend the previous element
                Some(last) if interval.start() <= last.end() => {
                    *last = last.span(&interval);
                }
                _ => merged.push(interval),
            }
        }

        Self { intervals: merged }
    }

    pub fn single(interval: Interval) -> Self {
        Self::from_intervals([interval])
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn into_vec(self) -> Vec<Interval> {
        self.intervals
    }

    /// Smallest single interval covering the whole list
    pub fn span(&self) -> Option<Interval> {
        let first = self.intervals.first()?;
        let last = self.intervals.last()?;
        Some(first.span(last))
    }

    pub fn union(&self, other: &SimplifiedIntervalList) -> SimplifiedIntervalList {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::from_intervals(self.intervals.iter().chain(other.intervals.iter()).copied())
    }

    pub fn intersect(&self, other: &SimplifiedIntervalList) -> SimplifiedIntervalList {
        let (a, b) = (&self.intervals, &other.intervals);
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < a.len() && j < b.len() {
            if let Some(overlap) = a[i].intersection(&b[j]) {
                out.push(overlap);
            }
            if a[i].end() < b[j].end() {
                i += 1;
            } else {
                j += 1;
            }
        }

        Self::from_intervals(out)
    }

    /// Instants in `self` that are not in `other`
    pub fn subtract(&self, other: &SimplifiedIntervalList) -> SimplifiedIntervalList {
        if other.is_empty() {
            return self.clone();
        }

        let mut out = Vec::new();
        for interval in &self.intervals {
            let mut cursor = interval.start();
            let first = other
                .intervals
                .partition_point(|candidate| candidate.end() <= interval.start());

            for cut in &other.intervals[first..] {
                if cut.start() >= interval.end() {
                    break;
                }
                if cut.start() > cursor {
                    out.push(Interval {
                        start: cursor,
                        end: cut.start(),
                    });
                }
                cursor = cursor.max(cut.end());
                if cursor >= interval.end() {
                    break;
                }
            }

            if cursor < interval.end() {
                out.push(Interval {
                    start: cursor,
                    end: interval.end(),
                });
            }
        }

        Self::from_intervals(out)
    }

    /// Union of any number of lists; empty input yields an empty list
    pub fn union_all<'a, I>(lists: I) -> SimplifiedIntervalList
    where
        I: IntoIterator<Item = &'a SimplifiedIntervalList>,
    {
        Self::from_intervals(lists.into_iter().flat_map(|list| list.iter().copied()))
    }

    /// Intersection of any number of lists; empty input yields an empty list,
    /// never an unbounded one
    pub fn intersect_all<'a, I>(lists: I) -> SimplifiedIntervalList
    where
        I: IntoIterator<Item = &'a SimplifiedIntervalList>,
    {
        let mut lists = lists.into_iter();
        let Some(first) = lists.next() else {
            return SimplifiedIntervalList::new();
        };
        lists.fold(first.clone(), |acc, next| acc.intersect(next))
    }

    /// True when a single element fully covers `interval`
    pub fn contains_interval(&self, interval: &Interval) -> bool {
        if interval.is_empty() {
            return true;
        }
        let idx = self
            .intervals
            .partition_point(|candidate| candidate.start() <= interval.start());
        idx > 0 && self.intervals[idx - 1].contains(interval)
    }

    /// True when every instant of `other` is covered
    pub fn contains_all(&self, other: &SimplifiedIntervalList) -> bool {
        other.subtract(self).is_empty()
    }

    pub fn overlaps(&self, interval: &Interval) -> bool {
        let first = self
            .intervals
            .partition_point(|candidate| candidate.end() <= interval.start());
        self.intervals
            .get(first)
            .map(|candidate| candidate.overlaps(interval))
            .unwrap_or(false)
    }
}

impl FromIterator<Interval> for SimplifiedIntervalList {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        Self::from_intervals(iter)
    }
}

impl IntoIterator for SimplifiedIntervalList {
    type Item = Interval;
    type IntoIter = std::vec::IntoIter<Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.into_iter()
    }
}

impl<'a> IntoIterator for &'a SimplifiedIntervalList {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

impl<'de> Deserialize<'de> for SimplifiedIntervalList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<Interval>::deserialize(deserializer)?;
        Ok(Self::from_intervals(raw))
    }
}

impl fmt::Display for SimplifiedIntervalList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, interval) in self.intervals.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{interval}")?;
        }
        write!(f, "]")
    }
}
