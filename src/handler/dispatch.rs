use super::{DataRequestHandler, Next};
use crate::backend::{BackendError, BackendRegistry};
use crate::processor::ResponseProcessor;
use crate::request::{ApiRequest, BackendQuery, RequestContext, RequestLog, ResponseSource};
use crate::{Error, Result};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Terminal stage: sends the query to its backend
///
/// The call runs on its own task; `handle_request` returns as soon as it is
/// scheduled and the outcome reaches `processor` later.
pub struct DispatchHandler {
    backends: Arc<BackendRegistry>,
}

impl DispatchHandler {
    pub fn new(backends: Arc<BackendRegistry>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl DataRequestHandler for DispatchHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        _request: Arc<ApiRequest>,
        query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        _next: Next,
    ) -> Result<bool> {
        let backend_name = query.context.backend.clone();
        let client = self.backends.get(backend_name.as_deref())?;
        let outstanding = ctx.mark_sent();

        let span = info_span!(
            "backend.query",
            backend = backend_name.as_deref().unwrap_or("default"),
            query_id = query.context.query_id.as_deref().unwrap_or(""),
            query_type = ?query.query_type,
        );
        debug!(outstanding, "Dispatching backend query");

        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = client.execute(&query).await;
                let elapsed = started.elapsed();
                ctx.mark_received();

                match result {
                    Ok(response) => {
                        let mut log = RequestLog::for_query(&query, ResponseSource::Backend);
                        log.record_timing("backend", elapsed);
                        log.record_timings(&ctx.timings());
                        debug!(
                            rows = response.rows.len(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Backend answered"
                        );
                        processor.process_response(response, &query, log).await;
                    }
                    Err(BackendError::Http {
                        status,
                        reason,
                        body,
                    }) => {
                        warn!(status, reason = %reason, "Backend returned an error");
                        processor.on_error(&query, status, reason, body).await;
                    }
                    Err(BackendError::Transport(message)) => {
                        warn!(error = %message, "Backend call failed");
                        processor.on_failure(&query, Error::Transport(message)).await;
                    }
                }
            }
            .instrument(span),
        );
        Ok(true)
    }
}
