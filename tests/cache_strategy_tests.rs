//! Signature and entity-tag cache validation through the full chain

mod common;

use common::{
    days, gateway, harness, metadata, query, request, rows_for, BrokenCacheStore, ScriptedBackend,
    TABLE,
};
use querygate::backend::BackendResponse;
use querygate::cache::CacheStrategy;
use querygate::config::GatewayConfig;
use querygate::interval::Granularity;
use querygate::metadata::{DataSourceMetadata, SegmentInfo, ShardSpec};

use std::sync::Arc;
use std::time::Duration;

fn config(strategy: CacheStrategy) -> GatewayConfig {
    GatewayConfig {
        cache_strategy: strategy,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn test_signature_entry_expires_when_segments_change() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(config(CacheStrategy::Signature), ScriptedBackend::echo(), &[interval]);

    for _ in 0..2 {
        h.gateway
            .execute(
                request(Granularity::All, interval),
                query(Granularity::All, interval),
            )
            .await
            .unwrap();
    }
    assert_eq!(h.backend.calls(), 1);

    // A reindexed segment replaces v1
    let reindexed = SegmentInfo::new(TABLE, interval, "v2", ShardSpec::None)
        .with_dimensions(["page", "country"])
        .with_metrics(["added", "deleted"]);
    h.metadata
        .update(TABLE, DataSourceMetadata::new(TABLE, vec![reindexed]));

    h.gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();
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
async fn test_etag_revalidation_serves_cached_rows() {
    let interval = days("2020-01-01", "2020-01-02");
    let backend = ScriptedBackend::new(|q| {
        let response = match q.context.if_none_match.as_deref() {
            Some("\"rev-1\"") => BackendResponse::not_modified(Some("\"rev-1\"".to_string())),
            _ => BackendResponse::new(rows_for(q)).with_etag("\"rev-1\""),
        };
        (Duration::ZERO, Ok(response))
    });
    let h = harness(config(CacheStrategy::Etag), backend, &[interval]);

    let first = h
        .gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();
    let second = h
        .gateway
        .execute(
            request(Granularity::All, interval),
            query(Granularity::All, interval),
        )
        .await
        .unwrap();

    // Every read is revalidated with the backend
    assert_eq!(h.backend.calls(), 2);
    let received = h.backend.received();
    assert_eq!(received[0].context.if_none_match, None);
    assert_eq!(received[1].context.if_none_match.as_deref(), Some("\"rev-1\""));

    assert_eq!(first.rows, second.rows);
    assert_eq!(second.log.sources.get("revalidated"), Some(&1));
}

#[tokio::test]
async fn test_disabled_cache_always_dispatches() {
    let interval = days("2020-01-01", "2020-01-02");
    let h = harness(config(CacheStrategy::None), ScriptedBackend::echo(), &[interval]);

    for _ in 0..3 {
        h.gateway
            .execute(
                request(Granularity::All, interval),
                query(Granularity::All, interval),
            )
            .await
            .unwrap();
    }
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(h.cache.entry_count().await, 0);
}

#[tokio::test]
async fn test_failing_cache_store_never_fails_the_request() {
    let interval = days("2020-01-01", "2020-01-02");
    for strategy in [CacheStrategy::Raw, CacheStrategy::Signature, CacheStrategy::Etag] {
        let backend = ScriptedBackend::new(|q| {
            (
                Duration::ZERO,
                Ok(BackendResponse::new(rows_for(q)).with_etag("\"rev-1\"")),
            )
        });
        let store = Arc::new(BrokenCacheStore::default());
        let gateway = gateway(
            config(strategy),
            backend.clone(),
            metadata(&[interval]),
            store.clone(),
        );

        for round in 1..=2 {
            let response = gateway
                .execute(
                    request(Granularity::All, interval),
                    query(Granularity::All, interval),
                )
                .await
                .unwrap_or_else(|e| panic!("{strategy} request failed: {e}"));
            assert_eq!(
                response.rows,
                rows_for(&query(Granularity::All, interval)),
                "{strategy}"
            );
            assert_eq!(backend.calls(), round, "{strategy}");
        }
        assert_eq!(store.reads(), 2, "{strategy}");
        assert_eq!(store.writes(), 2, "{strategy}");
    }
}
