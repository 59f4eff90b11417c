//! End-to-end tests of the standard handler chain against a scripted backend

mod common;

use common::{days, harness, query, request, rows_for, ScriptedBackend};
use querygate::backend::{BackendError, BackendResponse, UncoveredIntervals};
use querygate::config::{GatewayConfig, WeightThresholds};
use querygate::interval::{Granularity, Interval, SimplifiedIntervalList};
use querygate::request::DataSource;
use querygate::{Error, Result};

use serde_json::json;
use std::time::Duration;

fn timestamps(rows: &[serde_json::Value]) -> Vec<String> {
    rows.iter()
        .map(|row| row["timestamp"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_split_merges_in_bucket_order_regardless_of_arrival() {
    // Earlier buckets answer last
    let backend = ScriptedBackend::new(|q| {
        let delay = match q.intervals[0].start().format("%d").to_string().as_str() {
            "01" => Duration::from_millis(60),
            "02" => Duration::from_millis(30),
            _ => Duration::ZERO,
        };
        (delay, Ok(BackendResponse::new(rows_for(q))))
    });
    let interval = days("2020-01-01", "2020-01-04");
    let h = harness(GatewayConfig::default(), backend, &[interval]);

    let response = h
        .gateway
        .execute(
            request(Granularity::Day, interval),
            query(Granularity::Day, interval),
        )
        .await
        .unwrap();

    assert_eq!(
        timestamps(&response.rows),
        vec![
            "2020-01-01T00:00:00+00:00",
            "2020-01-02T00:00:00+00:00",
            "2020-01-03T00:00:00+00:00",
        ]
    );
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(response.log.sub_queries, 3);
    assert!(!response.is_partial());

    let mut dispatched: Vec<_> = h
        .backend
        .received()
        .iter()
        .map(|q| q.intervals.clone())
        .collect();
    dispatched.sort();
    assert_eq!(
        dispatched,
        vec![
            vec![days("2020-01-01", "2020-01-02")],
            vec![days("2020-01-02", "2020-01-03")],
            vec![days("2020-01-03", "2020-01-04")],
        ]
    );
}

#[tokio::test]
async fn test_overlapping_intervals_split_into_distinct_buckets() {
    let first = days("2020-01-01", "2020-01-03");
    let second: Interval = "2020-01-02T12:00:00Z/2020-01-04T00:00:00Z".parse().unwrap();
    let h = harness(
        GatewayConfig::default(),
        ScriptedBackend::echo(),
        &[days("2020-01-01", "2020-01-04")],
    );

    let request = querygate::request::ApiRequest::new("wiki", Granularity::Day, vec![first, second])
        .with_dimensions(["page"])
        .with_metrics(["added"])
        .with_cardinality("page", 10);
    let mut backend_query = query(Granularity::Day, first);
    backend_query.intervals = vec![first, second];

    let response = h.gateway.execute(request, backend_query).await.unwrap();

    assert_eq!(h.backend.calls(), 3);
    assert_eq!(
        timestamps(&response.rows),
        vec![
            "2020-01-01T00:00:00+00:00",
            "2020-01-02T00:00:00+00:00",
            "2020-01-03T00:00:00+00:00",
        ]
    );
    let mut dispatched: Vec<_> = h
        .backend
        .received()
        .iter()
        .map(|q| q.intervals.clone())
        .collect();
    dispatched.sort();
    assert_eq!(
        dispatched,
        vec![
            vec![days("2020-01-01", "2020-01-02")],
            vec![days("2020-01-02", "2020-01-03")],
            vec![days("2020-01-03", "2020-01-04")],
        ]
    );
}

#[tokio::test]
async fn test_all_grain_is_not_split() {
    let interval = days("2020-01-01", "2020-01-04");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    h.gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();

    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.backend.received()[0].intervals, vec![interval]);
}

#[tokio::test]
async fn test_failed_sub_query_fails_the_request_once() {
    let backend = ScriptedBackend::new(|q| {
        if q.intervals[0] == days("2020-01-02", "2020-01-03") {
            (
                Duration::ZERO,
                Err(BackendError::Http {
                    status: 500,
                    reason: "Internal Server Error".to_string(),
                    body: "segment unavailable".to_string(),
                }),
            )
        } else {
            (Duration::from_millis(20), Ok(BackendResponse::new(rows_for(q))))
        }
    });
    let interval = days("2020-01-01", "2020-01-04");
    let h = harness(GatewayConfig::default(), backend, &[interval]);

    let err = h
        .gateway
        .execute(
            request(Granularity::Day, interval),
            query(Granularity::Day, interval),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Backend { status: 500, .. }));
}

#[tokio::test]
async fn test_repeat_query_is_served_from_cache() {
    let interval = days("2020-01-01", "2020-01-04");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    let first = h
        .gateway
        .execute(
            request(Granularity::Day, interval),
            query(Granularity::Day, interval),
        )
        .await
        .unwrap();
    let second = h
        .gateway
        .execute(
            request(Granularity::Day, interval),
            query(Granularity::Day, interval),
        )
        .await
        .unwrap();

    assert_eq!(h.backend.calls(), 3);
    assert_eq!(first.rows, second.rows);
    assert_eq!(second.log.sources.get("cache"), Some(&3));
}

#[tokio::test]
async fn test_priority_does_not_change_the_cache_entry() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    let mut low = query(Granularity::All, interval);
    low.context.priority = Some(-5);
    let mut high = query(Granularity::All, interval);
    high.context.priority = Some(10);
    assert_eq!(
        querygate::cache::cache_key(&low).unwrap(),
        querygate::cache::cache_key(&high).unwrap()
    );

    h.gateway
        .execute(request(Granularity::All, interval), low)
        .await
        .unwrap();
    h.gateway
        .execute(request(Granularity::All, interval), high)
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn test_read_cache_opt_out_still_refreshes_entry() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    for _ in 0..2 {
        h.gateway
            .execute(
                request(Granularity::All, interval).without_cache(),
                query(Granularity::All, interval),
            )
            .await
            .unwrap();
    }
    assert_eq!(h.backend.calls(), 2);

    h.gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn test_partial_response_is_never_cached() {
    let requested = days("2020-01-01", "2020-01-04");
    // The middle day has no segments
    let h = harness(
        GatewayConfig::default(),
        ScriptedBackend::echo(),
        &[days("2020-01-01", "2020-01-02"), days("2020-01-03", "2020-01-04")],
    );

    for _ in 0..2 {
        let response = h
            .gateway
            .execute(
                request(Granularity::Day, requested),
                query(Granularity::Day, requested),
            )
            .await
            .unwrap();
        assert!(response.is_partial());
        assert_eq!(
            response.missing_intervals,
            SimplifiedIntervalList::single(days("2020-01-02", "2020-01-03"))
        );
    }

    assert_eq!(h.backend.calls(), 6);
    assert_eq!(h.cache.entry_count().await, 0);
}

#[tokio::test]
async fn test_backend_gap_inside_available_data_is_an_error() {
    let interval = days("2020-01-01", "2020-01-02");
    let backend = ScriptedBackend::new(|q| {
        let uncovered = UncoveredIntervals {
            intervals: vec!["2020-01-01T06:00:00Z/2020-01-01T12:00:00Z".parse().unwrap()],
            overflowed: false,
        };
        (
            Duration::ZERO,
            Ok(BackendResponse::new(rows_for(q)).with_uncovered(uncovered)),
        )
    });
    let h = harness(GatewayConfig::default(), backend, &[interval]);

    let err = h
        .gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DataConsistency(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(h.cache.entry_count().await, 0);
}

fn weight_script(weight: u64) -> std::sync::Arc<ScriptedBackend> {
    ScriptedBackend::new(move |q| {
        let rows = match &q.data_source {
            DataSource::Query { .. } => vec![json!({
                "version": "v1",
                "timestamp": "2020-01-01T00:00:00Z",
                "event": {"count": weight}
            })],
            _ => rows_for(q),
        };
        (Duration::ZERO, Ok(BackendResponse::new(rows)))
    })
}

async fn run_weighed(weight: u64) -> (Result<usize>, std::sync::Arc<ScriptedBackend>) {
    let interval = days("2020-01-01", "2020-01-02");
    let config = GatewayConfig {
        weight_thresholds: WeightThresholds::new(1_000_000).with(Granularity::All, 1_000),
        ..GatewayConfig::default()
    };
    let h = harness(config, weight_script(weight), &[interval]);

    // No known cardinalities, so the heuristic cannot skip the check
    let request = querygate::request::ApiRequest::new("wiki", Granularity::All, vec![interval])
        .with_dimensions(["page"])
        .with_metrics(["added"]);
    let result = h
        .gateway
        .execute(request, query(Granularity::All, interval))
        .await
        .map(|response| response.rows.len());
    (result, h.backend)
}

#[tokio::test]
async fn test_weight_at_threshold_is_admitted() {
    let (result, backend) = run_weighed(1_000).await;

    assert_eq!(result.unwrap(), 1);
    let received = backend.received();
    assert_eq!(received.len(), 2);
    assert!(matches!(received[0].data_source, DataSource::Query { .. }));
    assert!(matches!(received[1].data_source, DataSource::Table { .. }));
}

#[tokio::test]
async fn test_weight_over_threshold_is_rejected_without_dispatch() {
    let (result, backend) = run_weighed(1_001).await;

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        Error::CapacityExceeded {
            estimated: 1_001,
            limit: 1_000
        }
    ));
    assert_eq!(err.status_code(), 507);

    let received = backend.received();
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0].data_source, DataSource::Query { .. }));
}

#[tokio::test]
async fn test_small_cardinality_skips_weight_check() {
    let interval = days("2020-01-01", "2020-01-02");
    let config = GatewayConfig {
        weight_thresholds: WeightThresholds::new(1),
        ..GatewayConfig::default()
    };
    let h = harness(config, weight_script(1_000_000), &[interval]);

    h.gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let interval = days("2020-01-01", "2020-01-02");
    let backend = ScriptedBackend::new(|q| {
        (Duration::from_secs(5), Ok(BackendResponse::new(rows_for(q))))
    });
    let config = GatewayConfig {
        request_timeout: Duration::from_millis(50),
        ..GatewayConfig::default()
    };
    let h = harness(config, backend, &[interval]);

    let err = h
        .gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
}

#[tokio::test]
async fn test_backend_sees_priority_timeout_and_uncovered_limit() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    h.gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();

    let received = h.backend.received();
    let sent = &received[0];
    let defaults = GatewayConfig::default();
    assert_eq!(sent.context.priority, Some(defaults.default_priority));
    assert_eq!(
        sent.context.uncovered_intervals_limit,
        Some(defaults.uncovered_intervals_limit)
    );
    let timeout = sent.context.timeout.unwrap();
    assert!(timeout > 0 && timeout <= defaults.request_timeout.as_millis() as u64);
    assert_eq!(sent.context.backend.as_deref(), Some("druid"));
}

#[tokio::test]
async fn test_unknown_table_is_rejected_before_dispatch() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(GatewayConfig::default(), ScriptedBackend::echo(), &[interval]);

    let err = h
        .gateway
        .execute(
            querygate::request::ApiRequest::new("missing", Granularity::All, vec![interval]),
            query(Granularity::All, interval),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Metadata(_)));
    assert_eq!(h.backend.calls(), 0);
}
