//! Admission decision once the weight evaluation query answers

use super::{row_field, ResponseProcessor};
use crate::backend::BackendResponse;
use crate::gateway::telemetry;
use crate::handler::Next;
use crate::request::{
    ApiRequest, BackendQuery, RequestContext, RequestLog, ResponseContext, WEIGHT_CHECK_TIMER,
    WEIGHT_COUNT_COLUMN,
};
use crate::Error;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives the weight evaluation answer and either rejects the original
/// query or sends it down the rest of the chain
///
/// Errors and failures of the evaluation itself are reported against the
/// original query.
pub struct WeightCheckProcessor {
    next_handler: Next,
    ctx: Arc<RequestContext>,
    request: Arc<ApiRequest>,
    original: BackendQuery,
    next: Arc<dyn ResponseProcessor>,
    limit: u64,
}

impl WeightCheckProcessor {
    pub fn new(
        next_handler: Next,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        original: BackendQuery,
        next: Arc<dyn ResponseProcessor>,
        limit: u64,
    ) -> Self {
        Self {
            next_handler,
            ctx,
            request,
            original,
            next,
            limit,
        }
    }

    fn stop_timer(&self) {
        if self.ctx.is_timer_running(WEIGHT_CHECK_TIMER) {
            self.ctx.stop_timer(WEIGHT_CHECK_TIMER);
        }
    }
}

/// The evaluation returns a single row; no rows means nothing matched
fn weight_of(response: &BackendResponse) -> u64 {
    let Some(row) = response.rows.first() else {
        return 0;
    };
    match row_field(row, WEIGHT_COUNT_COLUMN) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl ResponseProcessor for WeightCheckProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    async fn process_response(&self, response: BackendResponse, _query: &BackendQuery, _log: RequestLog) {
        self.stop_timer();
        let granularity = self.original.granularity.as_str();
        let weight = weight_of(&response);

        if weight > self.limit {
            warn!(
                query_id = ?self.original.context.query_id,
                weight,
                limit = self.limit,
                granularity,
                "Rejecting query over the weight limit"
            );
            telemetry::record_weight_check("rejected", granularity);
            self.next
                .on_failure(
                    &self.original,
                    Error::CapacityExceeded {
                        estimated: weight,
                        limit: self.limit,
                    },
                )
                .await;
            return;
        }

        debug!(weight, limit = self.limit, "Query within weight limit");
        telemetry::record_weight_check("admitted", granularity);
        let scheduled = self
            .next_handler
            .clone()
            .run(
                self.ctx.clone(),
                self.request.clone(),
                self.original.clone(),
                self.next.clone(),
            )
            .await;
        match scheduled {
            Ok(true) => {}
            Ok(false) => {
                self.next
                    .on_failure(
                        &self.original,
                        Error::Internal("query was not scheduled after the weight check".to_string()),
                    )
                    .await
            }
            Err(e) => self.next.on_failure(&self.original, e).await,
        }
    }

    async fn on_error(&self, _query: &BackendQuery, status: u16, reason: String, body: String) {
        self.stop_timer();
        telemetry::record_weight_check("error", self.original.granularity.as_str());
        self.next.on_error(&self.original, status, reason, body).await;
    }

    async fn on_failure(&self, _query: &BackendQuery, error: Error) {
        self.stop_timer();
        telemetry::record_weight_check("error", self.original.granularity.as_str());
        self.next.on_failure(&self.original, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_weight_reads_grouped_count() {
        let response = BackendResponse::new(vec![json!({
            "version": "v1",
            "timestamp": "2020-01-01T00:00:00Z",
            "event": {"count": 1234}
        })]);
        assert_eq!(weight_of(&response), 1234);
    }

    #[test]
    fn test_weight_of_empty_answer_is_zero() {
        assert_eq!(weight_of(&BackendResponse::new(vec![])), 0);
        assert_eq!(weight_of(&BackendResponse::new(vec![json!({"event": {}})])), 0);
    }

    #[test]
    fn test_weight_accepts_floating_counts() {
        let response = BackendResponse::new(vec![json!({"event": {"count": 12.0}})]);
        assert_eq!(weight_of(&response), 12);
    }
}
