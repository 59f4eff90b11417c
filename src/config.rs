//! Gateway configuration
//!
//! [`GatewayConfig::default`] gives a working single-node setup; every field
//! can be overridden from `QUERYGATE_*` environment variables with
//! [`GatewayConfig::from_env`].

use crate::cache::CacheStrategy;
use crate::interval::Granularity;
use crate::{Error, Result};

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Granularity → maximum estimated row count a query may produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightThresholds {
    default: u64,
    by_granularity: BTreeMap<Granularity, u64>,
}

impl WeightThresholds {
    pub fn new(default: u64) -> Self {
        Self {
            default,
            by_granularity: BTreeMap::new(),
        }
    }

    pub fn with(mut self, granularity: Granularity, limit: u64) -> Self {
        self.by_granularity.insert(granularity, limit);
        self
    }

    pub fn threshold(&self, granularity: Granularity) -> u64 {
        self.by_granularity
            .get(&granularity)
            .copied()
            .unwrap_or(self.default)
    }

    /// Parse `grain=limit` pairs, e.g. `day=500000,hour=100000`
    pub fn parse_overrides(mut self, raw: &str) -> Result<Self> {
        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (grain, limit) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "weight threshold entry '{pair}' is invalid, expected grain=limit"
                ))
            })?;
            let grain = Granularity::from_str(grain.trim())?;
            let limit = limit.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("weight threshold for '{grain}' is not a number: {e}"))
            })?;
            self.by_granularity.insert(grain, limit);
        }
        Ok(self)
    }
}

impl Default for WeightThresholds {
    fn default() -> Self {
        Self::new(1_000_000)
            .with(Granularity::All, 100_000)
            .with(Granularity::Hour, 500_000)
            .with(Granularity::Minute, 250_000)
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub cache_strategy: CacheStrategy,
    /// Largest serialized response written to the cache
    pub max_cache_entry_bytes: usize,
    /// Total in-memory cache capacity in bytes
    pub cache_capacity_bytes: u64,
    pub weight_thresholds: WeightThresholds,
    /// Cardinality estimates at or below this skip the weight check
    pub weight_check_skip_threshold: u64,
    pub default_priority: i32,
    /// Whole-request budget; the backend sees whatever is left of it
    pub request_timeout: Duration,
    /// Requested cap on uncovered intervals the backend reports
    pub uncovered_intervals_limit: u32,
    pub metadata_refresh_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_strategy: CacheStrategy::Raw,
            max_cache_entry_bytes: 10 * 1024 * 1024,  // 10MB
            cache_capacity_bytes: 512 * 1024 * 1024, // 512MB
            weight_thresholds: WeightThresholds::default(),
            weight_check_skip_threshold: 10_000,
            default_priority: 1,
            request_timeout: Duration::from_secs(60),
            uncovered_intervals_limit: 100,
            metadata_refresh_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by environment variables
    ///
    /// Environment variables:
    /// - QUERYGATE_CACHE_STRATEGY: none, raw (default), signature or etag
    /// - QUERYGATE_CACHE_MAX_ENTRY_BYTES
    /// - QUERYGATE_CACHE_CAPACITY_BYTES
    /// - QUERYGATE_WEIGHT_THRESHOLD_DEFAULT: limit for unmapped grains
    /// - QUERYGATE_WEIGHT_THRESHOLDS: per-grain limits, `day=500000,hour=100000`
    /// - QUERYGATE_WEIGHT_SKIP_THRESHOLD
    /// - QUERYGATE_DEFAULT_PRIORITY
    /// - QUERYGATE_REQUEST_TIMEOUT_MS
    /// - QUERYGATE_UNCOVERED_INTERVALS_LIMIT
    /// - QUERYGATE_METADATA_REFRESH_SECS
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = var("QUERYGATE_CACHE_STRATEGY") {
            config.cache_strategy = raw.parse()?;
        }
        if let Some(raw) = var("QUERYGATE_CACHE_MAX_ENTRY_BYTES") {
            config.max_cache_entry_bytes = parse_number("QUERYGATE_CACHE_MAX_ENTRY_BYTES", &raw)?;
        }
        if let Some(raw) = var("QUERYGATE_CACHE_CAPACITY_BYTES") {
            config.cache_capacity_bytes = parse_number("QUERYGATE_CACHE_CAPACITY_BYTES", &raw)?;
        }
        if let Some(raw) = var("QUERYGATE_WEIGHT_THRESHOLD_DEFAULT") {
            let default = parse_number("QUERYGATE_WEIGHT_THRESHOLD_DEFAULT", &raw)?;
            config.weight_thresholds = WeightThresholds {
                default,
                ..config.weight_thresholds
            };
        }
        if let Some(raw) = var("QUERYGATE_WEIGHT_THRESHOLDS") {
            config.weight_thresholds = config.weight_thresholds.parse_overrides(&raw)?;
        }
        if let Some(raw) = var("QUERYGATE_WEIGHT_SKIP_THRESHOLD") {
            config.weight_check_skip_threshold =
                parse_number("QUERYGATE_WEIGHT_SKIP_THRESHOLD", &raw)?;
        }
        if let Some(raw) = var("QUERYGATE_DEFAULT_PRIORITY") {
            config.default_priority = parse_number("QUERYGATE_DEFAULT_PRIORITY", &raw)?;
        }
        if let Some(raw) = var("QUERYGATE_REQUEST_TIMEOUT_MS") {
            let millis: u64 = parse_number("QUERYGATE_REQUEST_TIMEOUT_MS", &raw)?;
            if millis == 0 {
                return Err(Error::Config(
                    "QUERYGATE_REQUEST_TIMEOUT_MS must be positive".to_string(),
                ));
            }
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = var("QUERYGATE_UNCOVERED_INTERVALS_LIMIT") {
            config.uncovered_intervals_limit =
                parse_number("QUERYGATE_UNCOVERED_INTERVALS_LIMIT", &raw)?;
        }
        if let Some(raw) = var("QUERYGATE_METADATA_REFRESH_SECS") {
            let secs: u64 = parse_number("QUERYGATE_METADATA_REFRESH_SECS", &raw)?;
            config.metadata_refresh_interval = Duration::from_secs(secs.max(1));
        }

        info!(
            cache_strategy = %config.cache_strategy,
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            weight_skip_threshold = config.weight_check_skip_threshold,
            "Loaded gateway configuration"
        );
        Ok(config)
    }
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::Config(format!("{name} must be a number, got '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cache_strategy, CacheStrategy::Raw);
        assert_eq!(config.weight_thresholds.threshold(Granularity::Day), 1_000_000);
        assert_eq!(config.weight_thresholds.threshold(Granularity::All), 100_000);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("QUERYGATE_CACHE_STRATEGY", "signature"),
            ("QUERYGATE_WEIGHT_THRESHOLD_DEFAULT", "42"),
            ("QUERYGATE_WEIGHT_THRESHOLDS", "day=7, hour=9"),
            ("QUERYGATE_REQUEST_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.cache_strategy, CacheStrategy::Signature);
        assert_eq!(config.weight_thresholds.threshold(Granularity::Day), 7);
        assert_eq!(config.weight_thresholds.threshold(Granularity::Hour), 9);
        assert_eq!(config.weight_thresholds.threshold(Granularity::Month), 42);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_strict_parsing() {
        let err = GatewayConfig::from_lookup(lookup(&[("QUERYGATE_DEFAULT_PRIORITY", "high")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(GatewayConfig::from_lookup(lookup(&[("QUERYGATE_WEIGHT_THRESHOLDS", "day")])).is_err());
        assert!(GatewayConfig::from_lookup(lookup(&[("QUERYGATE_REQUEST_TIMEOUT_MS", "0")])).is_err());
    }
}
