//! Logging and metrics bootstrap for querygate binaries.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";

/// Telemetry settings read from the environment
///
/// - `OTEL_SERVICE_NAME`: overrides the component's default name
/// - `OTEL_RESOURCE_ATTRIBUTES`: extra `key=value` pairs, comma separated
/// - `QUERYGATE_TELEMETRY_ENABLED`: set to false to skip the meter provider
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub metrics_enabled: bool,
    pub resource_attributes: Vec<KeyValue>,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(default_service_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name = lookup("OTEL_SERVICE_NAME")
            .unwrap_or_else(|| default_service_name.to_string())
            .trim()
            .to_string();
        if service_name.is_empty() {
            return Err(Error::Config("OTEL_SERVICE_NAME cannot be empty".to_string()));
        }

        let metrics_enabled = match lookup("QUERYGATE_TELEMETRY_ENABLED") {
            Some(raw) => parse_bool("QUERYGATE_TELEMETRY_ENABLED", &raw)?,
            None => true,
        };

        let mut attributes = match lookup("OTEL_RESOURCE_ATTRIBUTES") {
            Some(raw) => parse_resource_attributes(&raw)?,
            None => BTreeMap::new(),
        };
        attributes.insert(ATTR_SERVICE_NAME.to_string(), service_name.clone());
        attributes
            .entry(ATTR_SERVICE_NAMESPACE.to_string())
            .or_insert_with(|| "querygate".to_string());

        Ok(Self {
            service_name,
            metrics_enabled,
            resource_attributes: attributes
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, v))
                .collect(),
        })
    }
}

/// Keeps the meter provider alive for the life of the process
pub struct Telemetry {
    config: TelemetryConfig,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Install the JSON log subscriber and the global meter provider
    ///
    /// `RUST_LOG` takes precedence over `log_level` when set.
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(log_level))
            .map_err(|e| Error::Config(format!("invalid log filter '{log_level}': {e}")))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

        let meter_provider = config.metrics_enabled.then(|| {
            let resource =
                Resource::default().merge(&Resource::new(config.resource_attributes.clone()));
            let provider = SdkMeterProvider::builder().with_resource(resource).build();
            global::set_meter_provider(provider.clone());
            provider
        });

        info!(
            service_name = %config.service_name,
            metrics_enabled = config.metrics_enabled,
            "Telemetry initialized"
        );
        Ok(Self {
            config,
            meter_provider,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.meter_provider {
            let _ = provider.shutdown();
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

fn parse_resource_attributes(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut attrs = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{pair}' is invalid, expected key=value"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
            ));
        }
        attrs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(attrs)
}
