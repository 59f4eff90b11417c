//! Best-effort cache population

use super::ResponseProcessor;
use crate::backend::BackendResponse;
use crate::cache::CacheStore;
use crate::gateway::telemetry;
use crate::request::{BackendQuery, RequestLog, ResponseContext, ResponseSource};
use crate::Error;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// How an entry is stored, and what a revalidation answer is checked against
#[derive(Debug, Clone)]
pub enum CacheWriteMode {
    Raw,
    /// Stored with the segment signature computed before dispatch
    Signature(String),
    /// Stored with the backend's entity tag; `cached` is the entry sent for
    /// revalidation, if any
    Etag { cached: Option<Bytes> },
}

/// Writes complete, settled responses to the cache before passing them on
///
/// A response is written only when the request has no missing and no
/// volatile intervals and the backend reported nothing uncovered. Write
/// failures are logged and never reach the caller.
pub struct CacheWriteProcessor {
    next: Arc<dyn ResponseProcessor>,
    store: Arc<dyn CacheStore>,
    key: String,
    mode: CacheWriteMode,
    max_entry_bytes: usize,
}

impl CacheWriteProcessor {
    pub fn new(
        next: Arc<dyn ResponseProcessor>,
        store: Arc<dyn CacheStore>,
        key: String,
        mode: CacheWriteMode,
        max_entry_bytes: usize,
    ) -> Self {
        Self {
            next,
            store,
            key,
            mode,
            max_entry_bytes,
        }
    }

    async fn write(&self, response: &BackendResponse) {
        if !self.next.response_context().is_cacheable() || response.has_uncovered() {
            debug!(key = %self.key, "Not caching partial or volatile response");
            telemetry::record_cache_write("skipped");
            return;
        }

        let payload = match serde_json::to_vec(response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to serialize response for cache");
                telemetry::record_cache_write("failed");
                return;
            }
        };
        if payload.len() > self.max_entry_bytes {
            debug!(
                key = %self.key,
                size = payload.len(),
                limit = self.max_entry_bytes,
                "Response too large to cache"
            );
            telemetry::record_cache_write("oversized");
            return;
        }

        let payload = Bytes::from(payload);
        let result = match &self.mode {
            CacheWriteMode::Raw => self.store.set(&self.key, payload).await,
            CacheWriteMode::Signature(signature) => {
                self.store
                    .set_with_token(&self.key, signature, payload)
                    .await
            }
            CacheWriteMode::Etag { .. } => match &response.etag {
                Some(etag) => self.store.set_with_token(&self.key, etag, payload).await,
                None => {
                    debug!(key = %self.key, "Backend sent no entity tag, not caching");
                    telemetry::record_cache_write("skipped");
                    return;
                }
            },
        };

        match result {
            Ok(()) => telemetry::record_cache_write("written"),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Cache write failed");
                telemetry::record_cache_write("failed");
            }
        }
    }

    /// Cached entity the backend just confirmed as current
    fn revalidated(&self) -> Result<BackendResponse, Error> {
        let CacheWriteMode::Etag {
            cached: Some(bytes),
        } = &self.mode
        else {
            return Err(Error::Cache(
                "backend answered not-modified without a cached entity".to_string(),
            ));
        };
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Cache(format!("cached entity is unreadable: {e}")))
    }
}

#[async_trait]
impl ResponseProcessor for CacheWriteProcessor {
    fn response_context(&self) -> &Arc<ResponseContext> {
        self.next.response_context()
    }

    async fn process_response(&self, response: BackendResponse, query: &BackendQuery, mut log: RequestLog) {
        if response.not_modified {
            match self.revalidated() {
                Ok(cached) => {
                    log.record_source(ResponseSource::Revalidated);
                    self.next.process_response(cached, query, log).await;
                }
                Err(e) => self.next.on_failure(query, e).await,
            }
            return;
        }

        self.write(&response).await;
        self.next.process_response(response, query, log).await;
    }

    async fn on_error(&self, query: &BackendQuery, status: u16, reason: String, body: String) {
        self.next.on_error(query, status, reason, body).await;
    }

    async fn on_failure(&self, query: &BackendQuery, error: Error) {
        self.next.on_failure(query, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCacheStore;
    use crate::interval::{test_interval, Granularity, SimplifiedIntervalList};
    use crate::processor::ResponseSink;
    use crate::request::{DataSource, QueryType};
    use serde_json::json;

    fn query() -> BackendQuery {
        BackendQuery::new(
            QueryType::Timeseries,
            DataSource::table("wiki"),
            Granularity::Day,
            vec![test_interval("2020-01-01", "2020-01-02")],
        )
    }

    #[tokio::test]
    async fn test_writes_complete_responses() {
        let store = Arc::new(MokaCacheStore::new(1 << 20));
        let (sink, rx) = ResponseSink::channel(Arc::new(ResponseContext::new()));
        let processor =
            CacheWriteProcessor::new(sink, store.clone(), "k".into(), CacheWriteMode::Raw, 1 << 20);

        processor
            .process_response(
                BackendResponse::new(vec![json!({"added": 1})]),
                &query(),
                RequestLog::default(),
            )
            .await;

        assert_eq!(rx.await.unwrap().unwrap().rows.len(), 1);
        let cached: BackendResponse =
            serde_json::from_slice(&store.get("k").await.unwrap().unwrap()).unwrap();
        assert_eq!(cached.rows, vec![json!({"added": 1})]);
    }

    #[tokio::test]
    async fn test_skips_partial_and_oversized_responses() {
        let store = Arc::new(MokaCacheStore::new(1 << 20));
        let context = Arc::new(ResponseContext::new());
        context.set_missing_intervals(SimplifiedIntervalList::single(test_interval(
            "2020-01-01",
            "2020-01-02",
        )));
        let (sink, rx) = ResponseSink::channel(context);
        let processor =
            CacheWriteProcessor::new(sink, store.clone(), "k".into(), CacheWriteMode::Raw, 1 << 20);
        processor
            .process_response(BackendResponse::new(vec![json!({})]), &query(), RequestLog::default())
            .await;
        assert!(rx.await.unwrap().is_ok());
        assert!(store.get("k").await.unwrap().is_none());

        let (sink, _rx) = ResponseSink::channel(Arc::new(ResponseContext::new()));
        let tiny = CacheWriteProcessor::new(sink, store.clone(), "big".into(), CacheWriteMode::Raw, 4);
        tiny.process_response(
            BackendResponse::new(vec![json!({"page": "a long page title"})]),
            &query(),
            RequestLog::default(),
        )
        .await;
        assert!(store.get("big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_not_modified_serves_cached_entity() {
        let store = Arc::new(MokaCacheStore::new(1 << 20));
        let cached = serde_json::to_vec(&BackendResponse::new(vec![json!({"added": 7})])).unwrap();
        let (sink, rx) = ResponseSink::channel(Arc::new(ResponseContext::new()));
        let processor = CacheWriteProcessor::new(
            sink,
            store,
            "k".into(),
            CacheWriteMode::Etag {
                cached: Some(Bytes::from(cached)),
            },
            1 << 20,
        );

        processor
            .process_response(
                BackendResponse::not_modified(Some("tag".into())),
                &query(),
                RequestLog::default(),
            )
            .await;
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.rows, vec![json!({"added": 7})]);
        assert_eq!(response.log.sources["revalidated"], 1);
    }
}
