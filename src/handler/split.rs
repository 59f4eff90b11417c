use super::{DataRequestHandler, Next};
use crate::gateway::telemetry;
use crate::interval::SimplifiedIntervalList;
use crate::processor::{ResponseProcessor, SplitMergeProcessor};
use crate::request::{ApiRequest, BackendQuery, RequestContext};
use crate::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Splits a query into one sub-query per grain bucket
///
/// Queries at the `all` grain pass through untouched. Sub-queries are
/// dispatched one after another without waiting for answers and share one
/// [`SplitMergeProcessor`]. A sub-query that fails to schedule is reported
/// to that processor; the others still run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SplitQueryHandler;

#[async_trait]
impl DataRequestHandler for SplitQueryHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        if query.granularity.is_all() {
            return next.run(ctx, request, query, processor).await;
        }

        // Overlapping request intervals must not yield overlapping buckets
        let requested = SimplifiedIntervalList::from_intervals(query.intervals.iter().copied());
        let sub_intervals = query.granularity.slice(&requested);
        if sub_intervals.is_empty() {
            return Err(Error::Query(
                "query intervals are empty, nothing to split".to_string(),
            ));
        }

        let fanout = u32::try_from(sub_intervals.len())
            .map_err(|_| Error::Query(format!("{} sub-queries is too many", sub_intervals.len())))?;
        if !ctx.begin_split(fanout) {
            error!(
                incoming = ctx.incoming().load(std::sync::atomic::Ordering::Acquire),
                outgoing = ctx.outgoing().load(std::sync::atomic::Ordering::Acquire),
                "Split attempted on a request that already dispatched or split"
            );
            return Err(Error::Protocol(
                "request counters were not at 1 when splitting".to_string(),
            ));
        }
        telemetry::record_split(u64::from(fanout));
        debug!(fanout, granularity = %query.granularity, "Splitting query");

        let merger: Arc<dyn ResponseProcessor> = Arc::new(SplitMergeProcessor::new(
            processor,
            query.clone(),
            &sub_intervals,
        ));
        for (idx, interval) in sub_intervals.into_iter().enumerate() {
            let mut sub_query = query.with_all_intervals(vec![interval]);
            if let Some(query_id) = &query.context.query_id {
                sub_query.context.query_id = Some(format!("{query_id}-{idx}"));
            }

            let scheduled = next
                .clone()
                .run(ctx.clone(), request.clone(), sub_query.clone(), merger.clone())
                .await;
            match scheduled {
                Ok(true) => {}
                Ok(false) => {
                    merger
                        .on_failure(
                            &sub_query,
                            Error::Internal(format!("sub-query for {interval} was not scheduled")),
                        )
                        .await
                }
                Err(e) => merger.on_failure(&sub_query, e).await,
            }
        }
        Ok(true)
    }
}
