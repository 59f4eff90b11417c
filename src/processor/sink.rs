//! Terminal processor handing the final outcome to the waiting caller

use super::ResponseProcessor;
use crate::backend::BackendResponse;
use crate::request::{BackendQuery, RequestLog, ResponseContext};
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::warn;

/// Rows and logging snapshot of a completed query
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub rows: Vec<serde_json::Value>,
    pub log: RequestLog,
}

/// Delivers the first outcome it receives; later ones are logged and dropped
pub struct ResponseSink {
    context: Arc<ResponseContext>,
    sender: Mutex<Option<oneshot::Sender<Result<QueryResponse>>>>,
}

impl ResponseSink {
    pub fn channel(
        context: Arc<ResponseContext>,
    ) -> (Arc<Self>, oneshot::Receiver<Result<QueryResponse>>) {
        let (tx, rx) = oneshot::channel();
        let sink = Arc::new(Self {
            context,
            sender: Mutex::new(Some(tx)),
        });
        (sink, rx)
    }

    fn deliver(&self, outcome: Result<QueryResponse>) {
        let Some(sender) = self.sender.lock().take() else {
            warn!(
                outcome_ok = outcome.is_ok(),
                "Dropping outcome delivered after the request completed"
            );
            return;
        };
        // The caller may have given up already
        let _ = sender.send(outcome);
    }
}

#[async_trait]
impl ResponseProcessor for ResponseSink {
    fn response_context(&self) -> &Arc<ResponseContext> {
        &self.context
    }

    async fn process_response(&self, response: BackendResponse, _query: &BackendQuery, log: RequestLog) {
        self.deliver(Ok(QueryResponse {
            rows: response.rows,
            log,
        }));
    }

    async fn on_error(&self, _query: &BackendQuery, status: u16, reason: String, body: String) {
        self.deliver(Err(Error::Backend {
            status,
            reason,
            body,
        }));
    }

    async fn on_failure(&self, _query: &BackendQuery, error: Error) {
        self.deliver(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{test_interval, Granularity};
    use crate::request::{DataSource, QueryType};

    #[tokio::test]
    async fn test_first_outcome_wins() {
        let (sink, rx) = ResponseSink::channel(Arc::new(ResponseContext::new()));
        let query = BackendQuery::new(
            QueryType::Timeseries,
            DataSource::table("wiki"),
            Granularity::Day,
            vec![test_interval("2020-01-01", "2020-01-02")],
        );

        sink.on_failure(&query, Error::Timeout).await;
        sink.process_response(
            BackendResponse::new(vec![serde_json::json!({"a": 1})]),
            &query,
            RequestLog::default(),
        )
        .await;

        assert!(matches!(rx.await.unwrap(), Err(Error::Timeout)));
    }
}
