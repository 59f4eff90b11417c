//! Periodic metadata refresh
//!
//! A [`MetadataLoader`] pulls a fresh [`DataSourceMetadata`] for every
//! configured table from a [`MetadataSource`] and publishes it to the
//! [`DataSourceMetadataService`]. A source answering "no content" produces a
//! valid empty snapshot; a failing table is logged and keeps its previous
//! snapshot.

use super::{DataSourceMetadata, DataSourceMetadataService, SegmentInfo, ShardSpec};
use crate::interval::Interval;
use crate::{Error, Result};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where segment metadata comes from
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the current metadata for `table`; `None` means the backend
    /// answered with no content
    async fn fetch(&self, table: &str) -> Result<Option<DataSourceMetadata>>;
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub empty: Vec<String>,
    pub failed: Vec<String>,
}

/// Refreshes table snapshots on an interval
pub struct MetadataLoader {
    source: Arc<dyn MetadataSource>,
    service: Arc<DataSourceMetadataService>,
    tables: Vec<String>,
    refresh_interval: Duration,
    shutdown: CancellationToken,
}

impl MetadataLoader {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        service: Arc<DataSourceMetadataService>,
        tables: Vec<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            service,
            tables,
            refresh_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`MetadataLoader::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Refresh until the shutdown token is cancelled
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.refresh_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.refresh_all().await;
                    if !report.failed.is_empty() {
                        warn!(failed = ?report.failed, "Metadata refresh incomplete");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Metadata loader shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over every configured table, fetched concurrently
    pub async fn refresh_all(&self) -> RefreshReport {
        let outcomes = join_all(self.tables.iter().map(|table| self.refresh_table(table))).await;

        let mut report = RefreshReport::default();
        for (table, outcome) in self.tables.iter().zip(outcomes) {
            match outcome {
                Ok(true) => report.refreshed.push(table.clone()),
                Ok(false) => report.empty.push(table.clone()),
                Err(e) => {
                    error!(table = %table, error = %e, "Failed to refresh table metadata");
                    report.failed.push(table.clone());
                }
            }
        }
        report
    }

    /// Refresh one table; returns false when the source had no content
    pub async fn refresh_table(&self, table: &str) -> Result<bool> {
        match self.source.fetch(table).await? {
            Some(metadata) => {
                debug!(table, segments = metadata.segments.len(), "Loaded table metadata");
                self.service.update(table, metadata);
                Ok(true)
            }
            None => {
                debug!(table, "Metadata source returned no content");
                self.service.update(table, DataSourceMetadata::empty(table));
                Ok(false)
            }
        }
    }
}

/// Coordinator-style HTTP metadata endpoint
pub struct HttpMetadataSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build metadata client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, table: &str) -> Result<Option<DataSourceMetadata>> {
        let url = format!("{}/druid/coordinator/v1/datasources/{}?full", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("GET {url}: {e}")))?;
        if body.is_empty() {
            return Ok(None);
        }
        let wire: WireDataSource = serde_json::from_slice(&body)?;
        Ok(Some(wire.into_metadata()))
    }
}

/// Coordinator payload: column lists arrive comma-joined
#[derive(Debug, Deserialize)]
struct WireDataSource {
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    data_source: String,
    interval: Interval,
    version: String,
    #[serde(default)]
    dimensions: String,
    #[serde(default)]
    metrics: String,
    #[serde(default)]
    shard_spec: ShardSpec,
    #[serde(default)]
    size: u64,
    identifier: String,
}

impl WireDataSource {
    fn into_metadata(self) -> DataSourceMetadata {
        let properties = self
            .properties
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();
        let segments = self
            .segments
            .into_iter()
            .map(|wire| SegmentInfo {
                data_source: wire.data_source,
                interval: wire.interval,
                dimensions: split_columns(&wire.dimensions),
                metrics: split_columns(&wire.metrics),
                version: wire.version,
                shard_spec: wire.shard_spec,
                size: wire.size,
                identifier: wire.identifier,
            })
            .collect();
        DataSourceMetadata {
            name: self.name,
            properties,
            segments,
        }
    }
}

fn split_columns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
