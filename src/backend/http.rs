//! Backend client speaking the broker's native JSON-over-HTTP protocol

use super::{BackendClient, BackendError, BackendResponse, UncoveredIntervals};
use crate::request::BackendQuery;
use crate::{Error, Result};

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Header the backend uses to return its response context
pub const RESPONSE_CONTEXT_HEADER: &str = "X-Druid-Response-Context";

pub struct HttpBackendClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackendClient {
    /// `base_url` is the broker root, e.g. `http://broker:8082`
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build backend client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/druid/v2", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn execute(
        &self,
        query: &BackendQuery,
    ) -> std::result::Result<BackendResponse, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(query);
        if let Some(timeout) = query.context.timeout {
            request = request.timeout(Duration::from_millis(timeout));
        }
        if let Some(etag) = &query.context.if_none_match {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(format!("POST {}: {e}", self.endpoint)))?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status == StatusCode::NOT_MODIFIED {
            debug!(query_id = ?query.context.query_id, "Backend confirmed cached entity");
            return Ok(BackendResponse::not_modified(etag));
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("").to_string();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                reason,
                body,
            });
        }

        let uncovered = response
            .headers()
            .get(RESPONSE_CONTEXT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| match serde_json::from_str::<UncoveredIntervals>(raw) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable backend response context");
                    None
                }
            });

        let body = response
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(format!("POST {}: {e}", self.endpoint)))?;
        let rows: Vec<serde_json::Value> = if body.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(&body).map_err(|e| BackendError::Http {
                status: status.as_u16(),
                reason: "unparseable response body".to_string(),
                body: e.to_string(),
            })?
        };

        Ok(BackendResponse {
            rows,
            uncovered,
            etag,
            not_modified: false,
        })
    }
}
