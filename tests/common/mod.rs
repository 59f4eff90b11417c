//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use querygate::availability::{AvailabilityRegistry, ConcreteAvailability};
use querygate::backend::{BackendClient, BackendError, BackendRegistry, BackendResponse};
use querygate::cache::{CacheStore, MokaCacheStore};
use querygate::config::GatewayConfig;
use querygate::gateway::{GatewayComponents, QueryGateway};
use querygate::handler::SingleBackendSelector;
use querygate::interval::{Granularity, Interval};
use querygate::metadata::{
    DataSourceMetadata, DataSourceMetadataService, DefaultingVolatileIntervalsService, SegmentInfo,
    ShardSpec,
};
use querygate::request::{ApiRequest, BackendQuery, DataSource, QueryType};
use querygate::Error;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: &str = "wiki";

/// `[start, end)` from two `YYYY-MM-DD` dates
pub fn days(start: &str, end: &str) -> Interval {
    format!("{start}T00:00:00Z/{end}T00:00:00Z").parse().unwrap()
}

pub fn day_segments(table: &str, intervals: &[Interval]) -> DataSourceMetadata {
    let segments = intervals
        .iter()
        .flat_map(|interval| Granularity::Day.buckets(interval))
        .map(|day| {
            SegmentInfo::new(table, day, "v1", ShardSpec::None)
                .with_dimensions(["page", "country"])
                .with_metrics(["added", "deleted"])
        })
        .collect();
    DataSourceMetadata::new(table, segments)
}

/// Metadata service with `TABLE` loaded for `intervals`
pub fn metadata(intervals: &[Interval]) -> Arc<DataSourceMetadataService> {
    let service = Arc::new(DataSourceMetadataService::new());
    service.update(TABLE, day_segments(TABLE, intervals));
    service
}

pub fn request(granularity: Granularity, interval: Interval) -> ApiRequest {
    ApiRequest::new(TABLE, granularity, vec![interval])
        .with_dimensions(["page"])
        .with_metrics(["added"])
        .with_cardinality("page", 10)
}

pub fn query(granularity: Granularity, interval: Interval) -> BackendQuery {
    BackendQuery::new(
        QueryType::GroupBy,
        DataSource::table(TABLE),
        granularity,
        vec![interval],
    )
    .with_dimensions(["page"])
}

/// One row per query interval, tagged with the interval start
pub fn rows_for(query: &BackendQuery) -> Vec<serde_json::Value> {
    query
        .intervals
        .iter()
        .map(|interval| {
            json!({
                "version": "v1",
                "timestamp": interval.start().to_rfc3339(),
                "event": {"page": "Main_Page", "added": 1}
            })
        })
        .collect()
}

type Script = dyn Fn(&BackendQuery) -> (Duration, Result<BackendResponse, BackendError>) + Send + Sync;

/// Backend answering from a script and recording every query it receives
pub struct ScriptedBackend {
    script: Box<Script>,
    received: Mutex<Vec<BackendQuery>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&BackendQuery) -> (Duration, Result<BackendResponse, BackendError>)
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            received: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Answers every query immediately with [`rows_for`]
    pub fn echo() -> Arc<Self> {
        Self::new(|q| (Duration::ZERO, Ok(BackendResponse::new(rows_for(q)))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<BackendQuery> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    async fn execute(&self, query: &BackendQuery) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(query.clone());
        let (delay, outcome) = (self.script)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

pub struct Harness {
    pub gateway: QueryGateway,
    pub backend: Arc<ScriptedBackend>,
    pub metadata: Arc<DataSourceMetadataService>,
    pub cache: Arc<MokaCacheStore>,
}

/// Gateway over `backend` with `TABLE` available for `available`
pub fn harness(
    config: GatewayConfig,
    backend: Arc<ScriptedBackend>,
    available: &[Interval],
) -> Harness {
    let metadata = metadata(available);
    let cache = Arc::new(MokaCacheStore::new(config.cache_capacity_bytes));
    let gateway = gateway(config, backend.clone(), metadata.clone(), cache.clone());
    Harness {
        gateway,
        backend,
        metadata,
        cache,
    }
}

/// Standard gateway over `TABLE` caching into `cache`
pub fn gateway(
    config: GatewayConfig,
    backend: Arc<ScriptedBackend>,
    metadata: Arc<DataSourceMetadataService>,
    cache: Arc<dyn CacheStore>,
) -> QueryGateway {
    let availability = AvailabilityRegistry::new().with_table(
        TABLE,
        Arc::new(ConcreteAvailability::new(TABLE, metadata.clone())),
    );
    let backend_client: Arc<dyn BackendClient> = backend;

    QueryGateway::new(
        config,
        GatewayComponents {
            metadata,
            availability: Arc::new(availability),
            volatile: Arc::new(DefaultingVolatileIntervalsService::default()),
            cache: Some(cache),
            backends: Arc::new(BackendRegistry::new().register("druid", backend_client)),
            selector: Arc::new(SingleBackendSelector::new("druid")),
        },
    )
}

/// Cache store whose every operation fails, counting attempts
#[derive(Default)]
pub struct BrokenCacheStore {
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl BrokenCacheStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read_failed<T>(&self) -> querygate::Result<T> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(Error::Cache("connection refused".to_string()))
    }

    fn write_failed(&self) -> querygate::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::Cache("connection refused".to_string()))
    }
}

#[async_trait]
impl CacheStore for BrokenCacheStore {
    async fn get(&self, _key: &str) -> querygate::Result<Option<Bytes>> {
        self.read_failed()
    }

    async fn set(&self, _key: &str, _value: Bytes) -> querygate::Result<()> {
        self.write_failed()
    }

    async fn get_with_token(&self, _key: &str) -> querygate::Result<Option<(String, Bytes)>> {
        self.read_failed()
    }

    async fn set_with_token(&self, _key: &str, _token: &str, _value: Bytes) -> querygate::Result<()> {
        self.write_failed()
    }
}
