//! Reconciles backend-reported gaps with the availability model

use super::ResponseProcessor;
use crate::backend::BackendResponse;
use crate::gateway::telemetry;
use crate::interval::{Granularity, SimplifiedIntervalList};
use crate::request::{BackendQuery, RequestLog, ResponseContext};
use crate::Error;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// Checks the backend's own uncovered intervals against what availability
/// promised
///
/// - an overflowed uncovered list is always an error
/// - uncovered data inside `available` is an error for strict availability
/// - for lenient availability the overlap is added to the missing intervals
///   and the response is served as partial
pub struct PartialDataProcessor {
    next: Arc<dyn ResponseProcessor>,
    available: SimplifiedIntervalList,
    granularity: Granularity,
    strict: bool,
}

impl PartialDataProcessor {
    pub fn new(
        next: Arc<dyn ResponseProcessor>,
        available: SimplifiedIntervalList,
        granularity: Granularity,
        strict: bool,
    ) -> Self {
        Self {
            next,
            available,
            granularity,
            strict,
        }
    }
}

#[async_trait]
impl ResponseProcessor for PartialDataProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    async fn process_response(&self, response: BackendResponse, query: &BackendQuery, log: RequestLog) {
        if let Some(uncovered) = &response.uncovered {
            if uncovered.overflowed {
                error!(
                    query_id = ?query.context.query_id,
                    "Backend uncovered interval list overflowed"
                );
                self.next
                    .on_failure(
                        query,
                        Error::DataConsistency(
                            "backend reported more uncovered intervals than it could list"
                                .to_string(),
                        ),
                    )
                    .await;
                return;
            }

            let uncovered: SimplifiedIntervalList = uncovered.intervals.iter().copied().collect();
            let conflict = uncovered.intersect(&self.available);
            if !conflict.is_empty() {
                telemetry::record_consistency_violation(self.strict);
                if self.strict {
                    error!(
                        query_id = ?query.context.query_id,
                        conflict = %conflict,
                        "Backend is missing data the availability model reports as present"
                    );
                    self.next
                        .on_failure(
                            query,
                            Error::DataConsistency(format!(
                                "backend reports {} uncovered but availability reports it present",
                                conflict
                            )),
                        )
                        .await;
                    return;
                }

                warn!(
                    query_id = ?query.context.query_id,
                    conflict = %conflict,
                    "Serving partial response for lenient availability"
                );
                self.response_context()
                    .add_missing_intervals(&self.granularity.widen(&conflict));
            }
        }

        self.next.process_response(response, query, log).await;
    }

    async fn on_error(&self, query: &BackendQuery, status: u16, reason: String, body: String) {
        self.next.on_error(query, status, reason, body).await;
    }

    async fn on_failure(&self, query: &BackendQuery, error: Error) {
        self.next.on_failure(query, error).await;
    }
}
