use super::{DataRequestHandler, Next};
use crate::backend::BackendResponse;
use crate::cache::{cache_key, CacheStore, CacheStrategy, QuerySigningService};
use crate::gateway::telemetry;
use crate::processor::{CacheWriteMode, CacheWriteProcessor, ResponseProcessor};
use crate::request::{ApiRequest, BackendQuery, RequestContext, RequestLog, ResponseSource};
use crate::Result;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers from the cache when it can, and arranges a cache write when not
///
/// Nothing about caching can fail a request: key, signature and lookup
/// problems are logged and the request continues uncached.
pub struct CacheReadHandler {
    store: Arc<dyn CacheStore>,
    strategy: CacheStrategy,
    signer: Option<Arc<QuerySigningService>>,
    max_entry_bytes: usize,
}

impl CacheReadHandler {
    pub fn new(store: Arc<dyn CacheStore>, strategy: CacheStrategy, max_entry_bytes: usize) -> Self {
        Self {
            store,
            strategy,
            signer: None,
            max_entry_bytes,
        }
    }

    /// Required by the signature strategy
    pub fn with_signer(mut self, signer: Arc<QuerySigningService>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Deliver a cached answer as if it had made the round trip
    async fn serve(
        &self,
        ctx: &RequestContext,
        query: &BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        response: BackendResponse,
    ) -> Result<bool> {
        ctx.mark_sent();
        ctx.mark_received();
        telemetry::record_cache_lookup(self.strategy.as_str(), "hit");
        debug!(query_id = ?query.context.query_id, "Serving query from cache");

        let log = RequestLog::for_query(query, ResponseSource::Cache);
        processor.process_response(response, query, log).await;
        Ok(true)
    }

    fn decode(&self, key: &str, bytes: &Bytes) -> Option<BackendResponse> {
        match serde_json::from_slice(bytes) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key, error = %e, "Ignoring unreadable cache entry");
                telemetry::record_cache_lookup(self.strategy.as_str(), "error");
                None
            }
        }
    }

    fn lookup_failed(&self, key: &str, error: &crate::Error) {
        warn!(key, error = %error, "Cache lookup failed");
        telemetry::record_cache_lookup(self.strategy.as_str(), "error");
    }

    fn miss(&self, key: &str) {
        debug!(key, "Cache miss");
        telemetry::record_cache_lookup(self.strategy.as_str(), "miss");
    }
}

#[async_trait]
impl DataRequestHandler for CacheReadHandler {
    async fn handle_request(
        &self,
        ctx: Arc<RequestContext>,
        request: Arc<ApiRequest>,
        mut query: BackendQuery,
        processor: Arc<dyn ResponseProcessor>,
        next: Next,
    ) -> Result<bool> {
        if !self.strategy.is_enabled() {
            return next.run(ctx, request, query, processor).await;
        }

        let key = match cache_key(&query) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Could not build cache key, continuing uncached");
                return next.run(ctx, request, query, processor).await;
            }
        };

        let mode = match self.strategy {
            CacheStrategy::None => return next.run(ctx, request, query, processor).await,
            CacheStrategy::Raw => {
                if ctx.read_cache() {
                    match self.store.get(&key).await {
                        Ok(Some(bytes)) => {
                            if let Some(cached) = self.decode(&key, &bytes) {
                                return self.serve(&ctx, &query, processor, cached).await;
                            }
                        }
                        Ok(None) => self.miss(&key),
                        Err(e) => self.lookup_failed(&key, &e),
                    }
                }
                CacheWriteMode::Raw
            }
            CacheStrategy::Signature => {
                let signature = match self.signer.as_ref().map(|s| s.segment_signature(&query)) {
                    Some(Ok(signature)) => signature,
                    Some(Err(e)) => {
                        warn!(key, error = %e, "Could not sign query, continuing uncached");
                        return next.run(ctx, request, query, processor).await;
                    }
                    None => {
                        warn!("Signature caching configured without a signing service");
                        return next.run(ctx, request, query, processor).await;
                    }
                };
                if ctx.read_cache() {
                    match self.store.get_with_token(&key).await {
                        Ok(Some((token, bytes))) if token == signature => {
                            if let Some(cached) = self.decode(&key, &bytes) {
                                return self.serve(&ctx, &query, processor, cached).await;
                            }
                        }
                        Ok(Some(_)) => {
                            debug!(key, "Cached entry signed for an older segment set");
                            telemetry::record_cache_lookup(self.strategy.as_str(), "stale");
                        }
                        Ok(None) => self.miss(&key),
                        Err(e) => self.lookup_failed(&key, &e),
                    }
                }
                CacheWriteMode::Signature(signature)
            }
            CacheStrategy::Etag => {
                let mut cached = None;
                if ctx.read_cache() {
                    match self.store.get_with_token(&key).await {
                        Ok(Some((etag, bytes))) => {
                            debug!(key, "Revalidating cached entity with the backend");
                            telemetry::record_cache_lookup(self.strategy.as_str(), "revalidate");
                            query.context.if_none_match = Some(etag);
                            cached = Some(bytes);
                        }
                        Ok(None) => self.miss(&key),
                        Err(e) => self.lookup_failed(&key, &e),
                    }
                }
                CacheWriteMode::Etag { cached }
            }
        };

        let processor: Arc<dyn ResponseProcessor> = Arc::new(CacheWriteProcessor::new(
            processor,
            self.store.clone(),
            key,
            mode,
            self.max_entry_bytes,
        ));
        next.run(ctx, request, query, processor).await
    }
}
