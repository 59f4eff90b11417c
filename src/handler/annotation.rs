use super::{DataRequestHandler, Next};
use crate::availability::AvailabilityRegistry;
use crate::interval::{Granularity, SimplifiedIntervalList};
use crate::metadata::VolatileIntervalsService;
use crate::processor::{PartialDataProcessor, ResponseProcessor};
use crate::request::{ApiRequest, BackendQuery, RequestContext};
use crate::Result;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Records missing and volatile intervals before anything is dispatched
///
/// Missing intervals are the request-grain buckets that availability does not
/// fully cover. The processor is wrapped so backend-reported gaps are checked
/// against the same availability answer.
pub struct PartialDataHandler {
    availability: Arc<AvailabilityRegistry>,
    volatile: Arc<dyn VolatileIntervalsService>,
}

impl PartialDataHandler {
    pub fn new(
        availability: Arc<AvailabilityRegistry>,
        volatile: Arc<dyn VolatileIntervalsService>,
    ) -> Self {
        Self {
            availability,
            volatile,
        }
    }
}

fn missing_buckets(
    granularity: Granularity,
    requested: &SimplifiedIntervalList,
    available: &SimplifiedIntervalList,
) -> SimplifiedIntervalList {
    granularity
        .slice(requested)
        .into_iter()
        .filter(|bucket| !available.contains_interval(bucket))
        .collect()
}

#[async_trait]
impl DataRequestHandler for PartialDataHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        let availability = self.availability.get(&request.table)?;
        let available = availability.available_intervals(&request.constraint())?;
        let requested = request.requested_intervals();

        let missing = missing_buckets(request.granularity, &requested, &available);
        let volatile =
            self.volatile
                .volatile_intervals(request.granularity, &requested, &request.table);
        if !missing.is_empty() || !volatile.is_empty() {
            debug!(
                table = %request.table,
                missing = %missing,
                volatile = %volatile,
                "Request covers incomplete data"
            );
        }

        let response_context = processor.response_context();
        response_context.set_missing_intervals(missing);
        response_context.set_volatile_intervals(volatile);

        let processor: Arc<dyn ResponseProcessor> = Arc::new(PartialDataProcessor::new(
            processor,
            available,
            request.granularity,
            availability.is_strict(),
        ));
        next.run(ctx, request, query, processor).await
    }
}
