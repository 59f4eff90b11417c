//! Query gateway
//!
//! The gateway owns the handler chain and turns one [`ApiRequest`] plus its
//! translated [`BackendQuery`] into a [`GatewayResponse`]:
//! - builds the per-request and per-response contexts
//! - runs the chain until the query is scheduled
//! - waits, within the request timeout, for the sink to receive the outcome
//! - attaches missing/volatile intervals and pagination to the answer

pub mod telemetry;

use crate::availability::AvailabilityRegistry;
use crate::backend::BackendRegistry;
use crate::cache::{CacheStore, QuerySigningService};
use crate::config::GatewayConfig;
use crate::handler::{
    BackendSelector, BackendSelectorHandler, CacheReadHandler, DispatchHandler, HandlerChain, Next,
    PartialDataHandler, ShapingHandler, SplitQueryHandler, WeightCheckHandler,
};
use crate::interval::SimplifiedIntervalList;
use crate::metadata::{DataSourceMetadataService, VolatileIntervalsService};
use crate::processor::ResponseSink;
use crate::request::{
    ApiRequest, BackendQuery, PaginationInfo, RequestContext, RequestLog, ResponseContext,
    REQUEST_TIMER,
};
use crate::{Error, Result};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Shared services the standard chain is built from
pub struct GatewayComponents {
    pub metadata: Arc<DataSourceMetadataService>,
    pub availability: Arc<AvailabilityRegistry>,
    pub volatile: Arc<dyn VolatileIntervalsService>,
    /// `None` disables caching regardless of the configured strategy
    pub cache: Option<Arc<dyn CacheStore>>,
    pub backends: Arc<BackendRegistry>,
    pub selector: Arc<dyn BackendSelector>,
}

/// Answer to one gateway request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub rows: Vec<serde_json::Value>,
    pub missing_intervals: SimplifiedIntervalList,
    pub volatile_intervals: SimplifiedIntervalList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationInfo>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub log: RequestLog,
}

impl GatewayResponse {
    /// Some requested data is known to be absent
    pub fn is_partial(&self) -> bool {
        !self.missing_intervals.is_empty()
    }
}

/// Entry point for serving queries
pub struct QueryGateway {
    config: GatewayConfig,
    chain: Next,
}

impl QueryGateway {
    /// Gateway running the standard chain
    pub fn new(config: GatewayConfig, components: GatewayComponents) -> Self {
        let mut chain = HandlerChain::new()
            .then(PartialDataHandler::new(
                components.availability,
                components.volatile,
            ))
            .then(ShapingHandler)
            .then(SplitQueryHandler);

        match components.cache {
            Some(store) if config.cache_strategy.is_enabled() => {
                let signer = Arc::new(QuerySigningService::new(components.metadata));
                chain = chain.then(
                    CacheReadHandler::new(store, config.cache_strategy, config.max_cache_entry_bytes)
                        .with_signer(signer),
                );
            }
            _ => debug!("Response caching disabled"),
        }

        let chain = chain
            .then(WeightCheckHandler::new(
                config.weight_thresholds.clone(),
                config.weight_check_skip_threshold,
            ))
            .then(BackendSelectorHandler::new(
                components.selector,
                config.default_priority,
                config.request_timeout,
                config.uncovered_intervals_limit,
            ))
            .then(DispatchHandler::new(components.backends))
            .build();

        Self { config, chain }
    }

    /// Gateway running a caller-assembled chain
    pub fn with_chain(config: GatewayConfig, chain: Next) -> Self {
        Self { config, chain }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn execute(&self, request: ApiRequest, query: BackendQuery) -> Result<GatewayResponse> {
        self.execute_with_headers(request, query, std::iter::empty::<(String, String)>())
            .await
    }

    /// Serve one request; `headers` are the inbound request headers
    pub async fn execute_with_headers<I, K, V>(
        &self,
        request: ApiRequest,
        mut query: BackendQuery,
        headers: I,
    ) -> Result<GatewayResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let started = Instant::now();
        let query_id = query
            .context
            .query_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let span = info_span!(
            "query.execute",
            table = %request.table,
            query_id = %query_id,
            granularity = %request.granularity,
        );

        let result = self
            .run(request, query, headers)
            .instrument(span)
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(response) => telemetry::record_request(telemetry::RequestMetrics {
                outcome: "success",
                error_class: None,
                duration_seconds: elapsed,
                rows_returned: response.rows.len() as u64,
                partial: response.is_partial(),
            }),
            Err(e) => {
                warn!(query_id = %query_id, error = %e, status = e.status_code(), "Request failed");
                telemetry::record_request(telemetry::RequestMetrics {
                    outcome: "error",
                    error_class: Some(e.class()),
                    duration_seconds: elapsed,
                    rows_returned: 0,
                    partial: false,
                });
            }
        }
        result
    }

    async fn run<I, K, V>(
        &self,
        request: ApiRequest,
        query: BackendQuery,
        headers: I,
    ) -> Result<GatewayResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let ctx = Arc::new(RequestContext::new(request.read_cache).with_headers(headers));
        ctx.start_timer(REQUEST_TIMER);
        let response_context = Arc::new(ResponseContext::new());
        let (sink, rx) = ResponseSink::channel(response_context.clone());

        let scheduled = self
            .chain
            .clone()
            .run(ctx.clone(), Arc::new(request), query, sink)
            .await?;
        if !scheduled {
            return Err(Error::Internal(
                "handler chain declined to schedule the query".to_string(),
            ));
        }

        let remaining = self.config.request_timeout.saturating_sub(ctx.elapsed());
        let outcome = match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                return Err(Error::Internal(
                    "query finished without reporting an outcome".to_string(),
                ))
            }
            Err(_) => return Err(Error::Timeout),
        };
        let answer = outcome?;
        ctx.stop_timer(REQUEST_TIMER);

        let mut log = answer.log;
        log.record_timings(&ctx.timings());
        Ok(GatewayResponse {
            rows: answer.rows,
            missing_intervals: response_context.missing_intervals(),
            volatile_intervals: response_context.volatile_intervals(),
            pagination: response_context.pagination(),
            headers: response_context.headers(),
            log,
        })
    }
}
