use super::{DataRequestHandler, Next};
use crate::config::WeightThresholds;
use crate::gateway::telemetry;
use crate::processor::{ResponseProcessor, WeightCheckProcessor};
use crate::request::{ApiRequest, BackendQuery, RequestContext, WEIGHT_CHECK_TIMER};
use crate::Result;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Admission control
///
/// Requests whose cardinality estimate is already small skip straight on.
/// Everything else first sends a weight evaluation query through the rest of
/// the chain; the [`WeightCheckProcessor`] waiting for it decides whether the
/// original query follows.
pub struct WeightCheckHandler {
    thresholds: WeightThresholds,
    skip_threshold: u64,
}

impl WeightCheckHandler {
    pub fn new(thresholds: WeightThresholds, skip_threshold: u64) -> Self {
        Self {
            thresholds,
            skip_threshold,
        }
    }

    /// Rows the full query can produce at most, when that is cheap to know
    fn estimated_rows(&self, request: &ApiRequest, query: &BackendQuery) -> Option<u64> {
        let per_bucket = request.cardinality_estimate()?;
        let buckets = query.granularity.bucket_count(&query.intervals);
        Some(per_bucket.saturating_mul(buckets))
    }
}

#[async_trait]
impl DataRequestHandler for WeightCheckHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        if let Some(estimate) = self.estimated_rows(&request, &query) {
            if estimate <= self.skip_threshold {
                debug!(estimate, "Skipping weight check for small query");
                telemetry::record_weight_check("skipped", query.granularity.as_str());
                return next.run(ctx, request, query, processor).await;
            }
        }

        let limit = self.thresholds.threshold(query.granularity);
        let evaluation = query.weight_evaluation();
        debug!(
            limit,
            granularity = %query.granularity,
            "Dispatching weight evaluation query"
        );

        ctx.expect_round_trip();
        ctx.start_timer(WEIGHT_CHECK_TIMER);
        let checker: Arc<dyn ResponseProcessor> = Arc::new(WeightCheckProcessor::new(
            next.clone(),
            ctx.clone(),
            request.clone(),
            query,
            processor,
            limit,
        ));
        next.run(ctx, request, evaluation, checker).await
    }
}
