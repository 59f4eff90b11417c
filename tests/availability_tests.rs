//! Availability answers under concurrent metadata refresh, and across
//! composed availabilities

mod common;

use common::{day_segments, days, TABLE};
use querygate::availability::{
    Availability, ConcreteAvailability, DataSourceConstraint, MetricUnionAvailability,
    PureUnionAvailability,
};
use querygate::interval::SimplifiedIntervalList;
use querygate::metadata::DataSourceMetadataService;

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;

fn constraint() -> DataSourceConstraint {
    DataSourceConstraint::new()
        .with_dimensions(["page"])
        .with_metrics(["added"])
}

/// Readers racing snapshot swaps see one whole snapshot or the other
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_is_atomic_per_table() {
    let early = days("2020-01-01", "2020-01-04");
    let late = days("2020-02-01", "2020-02-03");
    let service = Arc::new(DataSourceMetadataService::new());
    service.update(TABLE, day_segments(TABLE, &[early]));
    let availability = Arc::new(ConcreteAvailability::new(TABLE, service.clone()));

    let mut tasks = JoinSet::new();
    for writer in 0..4 {
        let service = service.clone();
        tasks.spawn(async move {
            for i in 0..200 {
                let interval = if (i + writer) % 2 == 0 { early } else { late };
                service.update(TABLE, day_segments(TABLE, &[interval]));
                tokio::task::yield_now().await;
            }
            Vec::new()
        });
    }
    for _ in 0..8 {
        let availability = availability.clone();
        tasks.spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..200 {
                seen.push(availability.available_intervals(&constraint()).unwrap());
                tokio::task::yield_now().await;
            }
            seen
        });
    }

    let allowed = [
        SimplifiedIntervalList::single(early),
        SimplifiedIntervalList::single(late),
    ];
    while let Some(result) = tasks.join_next().await {
        let seen = match result {
            Ok(seen) => seen,
            Err(e) => panic!("Task panicked: {}", e),
        };
        for answer in seen {
            assert!(
                allowed.contains(&answer),
                "observed a mixed snapshot: {}",
                answer
            );
        }
    }
}

#[test]
fn test_empty_constraint_has_no_availability() {
    let service = Arc::new(DataSourceMetadataService::new());
    service.update(TABLE, day_segments(TABLE, &[days("2020-01-01", "2020-01-04")]));
    service.update("edits", day_segments("edits", &[days("2020-01-01", "2020-01-04")]));

    let wiki: Arc<dyn Availability> = Arc::new(ConcreteAvailability::new(TABLE, service.clone()));
    let edits: Arc<dyn Availability> = Arc::new(ConcreteAvailability::new("edits", service));
    let union = PureUnionAvailability::new(vec![wiki.clone(), edits]);

    let empty = DataSourceConstraint::new();
    assert!(wiki.available_intervals(&empty).unwrap().is_empty());
    assert!(union.available_intervals(&empty).unwrap().is_empty());
}

#[test]
fn test_union_spans_sources_and_metric_union_intersects_owners() {
    let service = Arc::new(DataSourceMetadataService::new());
    service.update(TABLE, day_segments(TABLE, &[days("2020-01-01", "2020-01-05")]));
    service.update("edits", day_segments("edits", &[days("2020-01-03", "2020-01-08")]));
    let wiki: Arc<dyn Availability> = Arc::new(ConcreteAvailability::new(TABLE, service.clone()));
    let edits: Arc<dyn Availability> = Arc::new(ConcreteAvailability::new("edits", service));

    let union = PureUnionAvailability::new(vec![wiki.clone(), edits.clone()]);
    assert_eq!(
        union.available_intervals(&constraint()).unwrap(),
        SimplifiedIntervalList::single(days("2020-01-01", "2020-01-08"))
    );

    let metric_union = MetricUnionAvailability::new(vec![
        (wiki, BTreeSet::from(["added".to_string()])),
        (edits, BTreeSet::from(["deleted".to_string()])),
    ])
    .unwrap();
    let both = DataSourceConstraint::new()
        .with_dimensions(["page"])
        .with_metrics(["added", "deleted"]);
    assert_eq!(
        metric_union.available_intervals(&both).unwrap(),
        SimplifiedIntervalList::single(days("2020-01-03", "2020-01-05"))
    );
}

#[test]
fn test_metric_owned_twice_is_a_configuration_error() {
    let service = Arc::new(DataSourceMetadataService::new());
    service.update(TABLE, day_segments(TABLE, &[days("2020-01-01", "2020-01-02")]));
    let wiki: Arc<dyn Availability> = Arc::new(ConcreteAvailability::new(TABLE, service));

    let result = MetricUnionAvailability::new(vec![
        (wiki.clone(), BTreeSet::from(["added".to_string()])),
        (wiki, BTreeSet::from(["added".to_string()])),
    ]);
    assert!(matches!(result, Err(querygate::Error::Config(_))));
}
