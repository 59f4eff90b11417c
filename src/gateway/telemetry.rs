//! Gateway telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct GatewayInstruments {
    requests: Counter<u64>,
    request_duration_seconds: Histogram<f64>,
    rows_returned: Histogram<u64>,
    cache_lookups: Counter<u64>,
    cache_writes: Counter<u64>,
    weight_checks: Counter<u64>,
    split_fanout: Histogram<u64>,
    consistency_violations: Counter<u64>,
}

fn instruments() -> &'static GatewayInstruments {
    static INSTRUMENTS: OnceLock<GatewayInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("querygate.gateway");
        GatewayInstruments {
            requests: meter
                .u64_counter("querygate.requests")
                .with_description("Gateway requests by outcome")
                .init(),
            request_duration_seconds: meter
                .f64_histogram("querygate.request.duration")
                .with_description("Gateway end-to-end latency")
                .with_unit("s")
                .init(),
            rows_returned: meter
                .u64_histogram("querygate.request.rows_returned")
                .with_description("Rows returned per request")
                .init(),
            cache_lookups: meter
                .u64_counter("querygate.cache.lookups")
                .with_description("Cache lookups by outcome")
                .init(),
            cache_writes: meter
                .u64_counter("querygate.cache.writes")
                .with_description("Cache writes by outcome")
                .init(),
            weight_checks: meter
                .u64_counter("querygate.weight_check.outcomes")
                .with_description("Admission control outcomes")
                .init(),
            split_fanout: meter
                .u64_histogram("querygate.split.fanout")
                .with_description("Sub-queries per split request")
                .init(),
            consistency_violations: meter
                .u64_counter("querygate.availability.consistency_violations")
                .with_description("Backend-uncovered intervals the availability model believed present")
                .init(),
        }
    })
}

pub struct RequestMetrics {
    pub outcome: &'static str,
    pub error_class: Option<&'static str>,
    pub duration_seconds: f64,
    pub rows_returned: u64,
    pub partial: bool,
}

pub fn record_request(metrics: RequestMetrics) {
    let i = instruments();
    let mut attrs = vec![
        KeyValue::new("outcome", metrics.outcome),
        KeyValue::new("partial", metrics.partial),
    ];
    if let Some(error_class) = metrics.error_class {
        attrs.push(KeyValue::new("error.class", error_class));
    }

    i.requests.add(1, &attrs);
    i.request_duration_seconds
        .record(metrics.duration_seconds, &attrs);
    i.rows_returned.record(metrics.rows_returned, &attrs);
}

/// `outcome`: hit, miss, stale, revalidate or error
pub fn record_cache_lookup(strategy: &'static str, outcome: &'static str) {
    instruments().cache_lookups.add(
        1,
        &[
            KeyValue::new("strategy", strategy),
            KeyValue::new("outcome", outcome),
        ],
    );
}

/// `outcome`: written, skipped, oversized or failed
pub fn record_cache_write(outcome: &'static str) {
    instruments()
        .cache_writes
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

/// `outcome`: skipped, admitted, rejected or error
pub fn record_weight_check(outcome: &'static str, granularity: &'static str) {
    instruments().weight_checks.add(
        1,
        &[
            KeyValue::new("outcome", outcome),
            KeyValue::new("granularity", granularity),
        ],
    );
}

pub fn record_split(fanout: u64) {
    instruments().split_fanout.record(fanout, &[]);
}

pub fn record_consistency_violation(strict: bool) {
    instruments()
        .consistency_violations
        .add(1, &[KeyValue::new("strict", strict)]);
}
