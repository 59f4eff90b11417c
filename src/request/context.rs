//! Per-request and per-response mutable state

use crate::interval::SimplifiedIntervalList;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Timer name for the whole request
pub const REQUEST_TIMER: &str = "request";
/// Timer name for the weight-check round trip
pub const WEIGHT_CHECK_TIMER: &str = "weight_check";

#[derive(Debug, Clone, Copy)]
enum Timer {
    Running(Instant),
    Stopped(Duration),
}

/// State shared by every stage handling one inbound request
///
/// `incoming` and `outgoing` start at 1. Dispatching a backend query
/// decrements `outgoing`; receiving its answer decrements `incoming`. A split
/// raises both to the number of sub-queries first, so a fully answered
/// request always ends with both at zero.
#[derive(Debug)]
pub struct RequestContext {
    read_cache: bool,
    headers: BTreeMap<String, String>,
    incoming: AtomicU32,
    outgoing: AtomicU32,
    timers: Mutex<HashMap<String, Timer>>,
    started: Instant,
}

impl RequestContext {
    pub fn new(read_cache: bool) -> Self {
        Self {
            read_cache,
            headers: BTreeMap::new(),
            incoming: AtomicU32::new(1),
            outgoing: AtomicU32::new(1),
            timers: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Snapshot of the inbound headers, keys lower-cased
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
        self
    }

    pub fn read_cache(&self) -> bool {
        self.read_cache
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn incoming(&self) -> &AtomicU32 {
        &self.incoming
    }

    pub fn outgoing(&self) -> &AtomicU32 {
        &self.outgoing
    }

    /// Move both counters from 1 to `n`
    ///
    /// Returns false, leaving both counters untouched, when either is not 1.
    pub fn begin_split(&self, n: u32) -> bool {
        if self
            .incoming
            .compare_exchange(1, n, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self
            .outgoing
            .compare_exchange(1, n, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Put incoming back; only this caller can have moved it off 1
            self.incoming.store(1, Ordering::Release);
            return false;
        }
        true
    }

    /// Account for one extra backend round trip
    pub fn expect_round_trip(&self) {
        self.outgoing.fetch_add(1, Ordering::AcqRel);
        self.incoming.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_sent(&self) -> u32 {
        self.outgoing.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub fn mark_received(&self) -> u32 {
        self.incoming.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub fn start_timer(&self, name: &str) {
        self.timers
            .lock()
            .insert(name.to_string(), Timer::Running(Instant::now()));
    }

    /// Stop a running timer, returning its duration
    ///
    /// Stopping a timer that is not running is a no-op.
    pub fn stop_timer(&self, name: &str) -> Option<Duration> {
        let mut timers = self.timers.lock();
        match timers.get(name).copied() {
            Some(Timer::Running(started)) => {
                let elapsed = started.elapsed();
                timers.insert(name.to_string(), Timer::Stopped(elapsed));
                Some(elapsed)
            }
            _ => None,
        }
    }

    pub fn is_timer_running(&self, name: &str) -> bool {
        matches!(self.timers.lock().get(name), Some(Timer::Running(_)))
    }

    /// Durations of every stopped timer
    pub fn timings(&self) -> BTreeMap<String, Duration> {
        self.timers
            .lock()
            .iter()
            .filter_map(|(name, timer)| match timer {
                Timer::Stopped(duration) => Some((name.clone(), *duration)),
                Timer::Running(_) => None,
            })
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Page metadata recorded by pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: usize,
    pub per_page: usize,
    pub total_rows: usize,
}

/// Annotations accumulated while answering one request
///
/// Created once per request and shared by every sub-query of a split.
#[derive(Debug, Default)]
pub struct ResponseContext {
    missing_intervals: RwLock<SimplifiedIntervalList>,
    volatile_intervals: RwLock<SimplifiedIntervalList>,
    pagination: RwLock<Option<PaginationInfo>>,
    headers: RwLock<BTreeMap<String, String>>,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_intervals(&self) -> SimplifiedIntervalList {
        self.missing_intervals.read().clone()
    }

    pub fn set_missing_intervals(&self, intervals: SimplifiedIntervalList) {
        *self.missing_intervals.write() = intervals;
    }

    pub fn add_missing_intervals(&self, intervals: &SimplifiedIntervalList) {
        let mut missing = self.missing_intervals.write();
        *missing = missing.union(intervals);
    }

    pub fn volatile_intervals(&self) -> SimplifiedIntervalList {
        self.volatile_intervals.read().clone()
    }

    pub fn set_volatile_intervals(&self, intervals: SimplifiedIntervalList) {
        *self.volatile_intervals.write() = intervals;
    }

    pub fn pagination(&self) -> Option<PaginationInfo> {
        *self.pagination.read()
    }

    pub fn set_pagination(&self, info: PaginationInfo) {
        *self.pagination.write() = Some(info);
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.write().insert(name.into(), value.into());
    }

    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers.read().clone()
    }

    /// Complete, settled data: nothing missing and nothing volatile
    pub fn is_cacheable(&self) -> bool {
        self.missing_intervals.read().is_empty() && self.volatile_intervals.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::test_interval;

    #[test]
    fn test_split_transition_is_one_shot() {
        let ctx = RequestContext::new(true);
        assert!(ctx.begin_split(3));
        assert_eq!(ctx.incoming().load(Ordering::Acquire), 3);
        assert_eq!(ctx.outgoing().load(Ordering::Acquire), 3);

        assert!(!ctx.begin_split(2));
        assert_eq!(ctx.incoming().load(Ordering::Acquire), 3);
    }

    #[test]
    fn test_failed_split_leaves_counters_alone() {
        let ctx = RequestContext::new(true);
        ctx.mark_sent();
        assert!(!ctx.begin_split(4));
        assert_eq!(ctx.incoming().load(Ordering::Acquire), 1);
        assert_eq!(ctx.outgoing().load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_timers() {
        let ctx = RequestContext::new(false);
        ctx.start_timer(WEIGHT_CHECK_TIMER);
        assert!(ctx.is_timer_running(WEIGHT_CHECK_TIMER));
        assert!(ctx.timings().is_empty());

        assert!(ctx.stop_timer(WEIGHT_CHECK_TIMER).is_some());
        assert!(ctx.stop_timer(WEIGHT_CHECK_TIMER).is_none());
        assert!(!ctx.is_timer_running(WEIGHT_CHECK_TIMER));
        assert!(ctx.timings().contains_key(WEIGHT_CHECK_TIMER));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let ctx = RequestContext::new(true).with_headers([("If-None-Match", "abc")]);
        assert_eq!(ctx.header("if-none-match"), Some("abc"));
    }

    #[test]
    fn test_response_context_cacheability() {
        let response = ResponseContext::new();
        assert!(response.is_cacheable());

        response.add_missing_intervals(&SimplifiedIntervalList::single(test_interval(
            "2020-01-01",
            "2020-01-02",
        )));
        assert!(!response.is_cacheable());
        assert_eq!(response.missing_intervals().len(), 1);
    }
}
