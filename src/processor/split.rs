//! Merging the sub-responses of a split query

use super::ResponseProcessor;
use crate::backend::{BackendResponse, UncoveredIntervals};
use crate::interval::Interval;
use crate::request::{BackendQuery, RequestLog, ResponseContext};
use crate::Error;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Default)]
struct Slot {
    claimed: AtomicBool,
    filled: Mutex<Option<(BackendResponse, RequestLog)>>,
}

/// Collects one response per sub-interval and forwards a single merged one
///
/// Each sub-interval owns a slot. A response claims its slot with a single
/// compare-and-set; the response that fills the last slot performs the merge,
/// so it runs exactly once. Rows are concatenated in sub-interval order
/// regardless of arrival order and forwarded with the pre-split query.
///
/// Only the first error or failure is forwarded. A response for an interval
/// that was never dispatched, or a second response for the same interval, is
/// a protocol violation and fails the request.
pub struct SplitMergeProcessor {
    next: Arc<dyn ResponseProcessor>,
    original: BackendQuery,
    expected: HashMap<Interval, usize>,
    slots: Vec<Slot>,
    remaining: AtomicUsize,
    failed: AtomicBool,
}

impl SplitMergeProcessor {
    /// `sub_intervals` must be distinct; their order is the merge order
    pub fn new(
        next: Arc<dyn ResponseProcessor>,
        original: BackendQuery,
        sub_intervals: &[Interval],
    ) -> Self {
        let expected = sub_intervals
            .iter()
            .enumerate()
            .map(|(idx, interval)| (*interval, idx))
            .collect();
        Self {
            next,
            original,
            expected,
            slots: sub_intervals.iter().map(|_| Slot::default()).collect(),
            remaining: AtomicUsize::new(sub_intervals.len()),
            failed: AtomicBool::new(false),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Claim the failed flag; true for the first caller only
    fn claim_failure(&self) -> bool {
        self.failed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn fail(&self, error: Error) {
        if self.claim_failure() {
            self.next.on_failure(&self.original, error).await;
        } else {
            debug!(error = %error, "Dropping failure for an already failed split");
        }
    }

    fn slot_for(&self, query: &BackendQuery) -> Result<usize, Error> {
        let [interval] = query.intervals.as_slice() else {
            return Err(Error::Protocol(format!(
                "split sub-response carries {} intervals, expected exactly one",
                query.intervals.len()
            )));
        };
        self.expected
            .get(interval)
            .copied()
            .ok_or_else(|| Error::Protocol(format!("unexpected interval {} in split response", interval)))
    }

    async fn merge(&self) {
        if self.is_failed() {
            debug!("Skipping merge for a failed split");
            return;
        }

        let mut rows = Vec::new();
        let mut logs = Vec::with_capacity(self.slots.len());
        let mut uncovered: Option<UncoveredIntervals> = None;
        for slot in &self.slots {
            let filled = slot.filled.lock().take();
            let Some((response, log)) = filled else {
                self.fail(Error::Protocol("split merge found an unfilled slot".to_string()))
                    .await;
                return;
            };
            rows.extend(response.rows);
            if let Some(part) = response.uncovered {
                uncovered.get_or_insert_with(UncoveredIntervals::default).merge(part);
            }
            logs.push(log);
        }

        let merged = BackendResponse {
            rows,
            uncovered,
            etag: None,
            not_modified: false,
        };
        self.next
            .process_response(merged, &self.original, RequestLog::union(logs))
            .await;
    }
}

#[async_trait]
impl ResponseProcessor for SplitMergeProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    async fn process_response(&self, response: BackendResponse, query: &BackendQuery, log: RequestLog) {
        let idx = match self.slot_for(query) {
            Ok(idx) => idx,
            Err(e) => {
                error!(error = %e, "Rejecting split sub-response");
                self.fail(e).await;
                return;
            }
        };

        let slot = &self.slots[idx];
        if slot
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            error!(interval = %query.intervals[0], "Duplicate split sub-response");
            self.fail(Error::Protocol(format!(
                "duplicate response for interval {}",
                query.intervals[0]
            )))
            .await;
            return;
        }
        *slot.filled.lock() = Some((response, log));

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.merge().await;
        }
    }

    async fn on_error(&self, _query: &BackendQuery, status: u16, reason: String, body: String) {
        if self.claim_failure() {
            self.next
                .on_error(&self.original, status, reason, body)
                .await;
        } else {
            debug!(status, "Dropping error for an already failed split");
        }
    }

    async fn on_failure(&self, _query: &BackendQuery, error: Error) {
        self.fail(error).await;
    }
}
