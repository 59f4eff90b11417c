//! querygate probe
//!
//! Runs one backend query through the standard handler chain against a live
//! broker and prints the rows together with the missing/volatile annotations.

use querygate::availability::{AvailabilityRegistry, ConcreteAvailability};
use querygate::backend::{BackendRegistry, HttpBackendClient};
use querygate::cache::{CacheStore, MokaCacheStore};
use querygate::config::GatewayConfig;
use querygate::gateway::{GatewayComponents, QueryGateway};
use querygate::handler::SingleBackendSelector;
use querygate::metadata::{
    DataSourceMetadataService, DefaultingVolatileIntervalsService, HttpMetadataSource,
    MetadataLoader, NoVolatileIntervals, TrailingVolatileIntervals, VolatileIntervalsFunction,
};
use querygate::request::{ApiRequest, BackendQuery};
use querygate::telemetry::Telemetry;

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const BACKEND_NAME: &str = "broker";

/// querygate probe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend query JSON file
    query: PathBuf,

    /// Logical request JSON file; derived from the query when omitted
    #[arg(long)]
    request: Option<PathBuf>,

    /// Broker root URL
    #[arg(long, env = "QUERYGATE_BROKER_URL", default_value = "http://localhost:8082")]
    broker_url: String,

    /// Coordinator root URL for segment metadata; defaults to the broker URL
    #[arg(long, env = "QUERYGATE_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    /// Treat the trailing window of this many minutes as volatile
    #[arg(long)]
    volatile_minutes: Option<i64>,

    /// Bypass cache reads
    #[arg(long)]
    no_cache: bool,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "2000")]
    connect_timeout_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn request_from_query(query: &BackendQuery) -> anyhow::Result<ApiRequest> {
    let table = query
        .table_names()
        .into_iter()
        .next()
        .context("query does not name any table")?;
    let metrics: Vec<String> = query
        .aggregations
        .iter()
        .filter_map(|a| a.field_name.clone())
        .collect();
    Ok(
        ApiRequest::new(table, query.granularity, query.intervals.clone())
            .with_dimensions(query.dimensions.clone())
            .with_metrics(metrics),
    )
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("querygate-probe", &args.log_level)?;
    let config = GatewayConfig::from_env()?;

    let query: BackendQuery = read_json(&args.query)?;
    let mut request = match &args.request {
        Some(path) => read_json(path)?,
        None => request_from_query(&query)?,
    };
    if args.no_cache {
        request = request.without_cache();
    }

    let connect_timeout = Duration::from_millis(args.connect_timeout_ms);
    let tables: Vec<String> = query.table_names().into_iter().collect();
    let metadata = Arc::new(DataSourceMetadataService::new());
    let loader = MetadataLoader::new(
        Arc::new(HttpMetadataSource::new(
            args.coordinator_url.as_deref().unwrap_or(&args.broker_url),
            connect_timeout * 5,
        )?),
        metadata.clone(),
        tables.clone(),
        config.metadata_refresh_interval,
    );
    let report = loader.refresh_all().await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some tables have no metadata; availability will be empty");
    }

    let mut availability = AvailabilityRegistry::new();
    for table in &tables {
        availability.register(
            table.clone(),
            Arc::new(ConcreteAvailability::new(table.clone(), metadata.clone())),
        );
    }

    let volatile_default: Arc<dyn VolatileIntervalsFunction> = match args.volatile_minutes {
        Some(minutes) => Arc::new(TrailingVolatileIntervals::new(chrono::TimeDelta::minutes(minutes))),
        None => Arc::new(NoVolatileIntervals),
    };
    let cache: Arc<dyn CacheStore> = Arc::new(MokaCacheStore::new(config.cache_capacity_bytes));
    let backends = BackendRegistry::new().register(
        BACKEND_NAME,
        Arc::new(HttpBackendClient::new(&args.broker_url, connect_timeout)?),
    );

    let gateway = QueryGateway::new(
        config,
        GatewayComponents {
            metadata,
            availability: Arc::new(availability),
            volatile: Arc::new(DefaultingVolatileIntervalsService::new(volatile_default)),
            cache: Some(cache),
            backends: Arc::new(backends),
            selector: Arc::new(SingleBackendSelector::new(BACKEND_NAME)),
        },
    );

    info!(broker = %args.broker_url, tables = ?tables, "Running probe query");
    let response = gateway.execute(request, query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.is_partial() {
        warn!(missing = %response.missing_intervals, "Response is partial");
    }
    Ok(())
}
