//! Logging snapshot carried alongside every response

use super::BackendQuery;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// How a response was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Backend,
    Cache,
    Revalidated,
}

/// What happened while answering one query (or, once merged, a whole split)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub query_ids: Vec<String>,
    pub data_sources: BTreeSet<String>,
    /// Phase name → accumulated microseconds
    pub timings_us: BTreeMap<String, u64>,
    pub sources: BTreeMap<String, u32>,
    pub sub_queries: u32,
}

impl RequestLog {
    pub fn for_query(query: &BackendQuery, source: ResponseSource) -> Self {
        let mut log = Self {
            query_ids: query.context.query_id.iter().cloned().collect(),
            data_sources: query.table_names(),
            sub_queries: 1,
            ..Self::default()
        };
        log.record_source(source);
        log
    }

    pub fn record_timing(&mut self, phase: &str, duration: Duration) {
        *self.timings_us.entry(phase.to_string()).or_default() +=
            u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    }

    pub fn record_timings(&mut self, timings: &BTreeMap<String, Duration>) {
        for (phase, duration) in timings {
            self.timings_us
                .entry(phase.clone())
                .or_insert_with(|| u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
        }
    }

    pub fn record_source(&mut self, source: ResponseSource) {
        let label = match source {
            ResponseSource::Backend => "backend",
            ResponseSource::Cache => "cache",
            ResponseSource::Revalidated => "revalidated",
        };
        *self.sources.entry(label.to_string()).or_default() += 1;
    }

    /// Fold another snapshot into this one
    pub fn merge(&mut self, other: RequestLog) {
        self.query_ids.extend(other.query_ids);
        self.data_sources.extend(other.data_sources);
        for (phase, micros) in other.timings_us {
            let entry = self.timings_us.entry(phase).or_default();
            *entry = entry.saturating_add(micros);
        }
        for (source, count) in other.sources {
            *self.sources.entry(source).or_default() += count;
        }
        self.sub_queries += other.sub_queries;
    }

    /// Aggregate of several snapshots, in the order given
    pub fn union<I: IntoIterator<Item = RequestLog>>(logs: I) -> Self {
        logs.into_iter().fold(Self::default(), |mut acc, log| {
            acc.merge(log);
            acc
        })
    }
}
