//! Backend aggregation query model
//!
//! Only the parts of the backend query language this layer reasons about are
//! typed: query type, data source, granularity, intervals, dimensions,
//! aggregations and the query context. Filters and post-aggregations are
//! carried opaquely.

use crate::interval::{Granularity, Interval, SimplifiedIntervalList};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of the row-count aggregation used by weight evaluation
pub const WEIGHT_COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    Timeseries,
    GroupBy,
    TopN,
}

/// Where a query reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DataSource {
    Table {
        name: String,
    },
    Union {
        #[serde(rename = "dataSources")]
        data_sources: Vec<String>,
    },
    Query {
        query: Box<BackendQuery>,
    },
}

impl DataSource {
    pub fn table(name: impl Into<String>) -> Self {
        DataSource::Table { name: name.into() }
    }

    /// Physical tables this data source reads, nested queries included
    pub fn table_names(&self) -> BTreeSet<String> {
        match self {
            DataSource::Table { name } => BTreeSet::from([name.clone()]),
            DataSource::Union { data_sources } => data_sources.iter().cloned().collect(),
            DataSource::Query { query } => query.data_source.table_names(),
        }
    }
}

/// An aggregation, as `{"type", "name", "fieldName"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl Aggregation {
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            kind: "count".to_string(),
            name: name.into(),
            field_name: None,
        }
    }

    pub fn long_sum(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            kind: "longSum".to_string(),
            name: name.into(),
            field_name: Some(field_name.into()),
        }
    }

    pub fn double_sum(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            kind: "doubleSum".to_string(),
            name: name.into(),
            field_name: Some(field_name.into()),
        }
    }
}

/// Per-request metadata sent alongside a query
///
/// None of these fields change what a query computes, so none of them take
/// part in cache keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncovered_intervals_limit: Option<u32>,
    /// Backend endpoint chosen for this query
    #[serde(skip)]
    pub backend: Option<String>,
    /// Entity tag to revalidate against
    #[serde(skip)]
    pub if_none_match: Option<String>,
}

/// A translated, executable backend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendQuery {
    pub query_type: QueryType,
    pub data_source: DataSource,
    pub granularity: Granularity,
    pub intervals: Vec<Interval>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregations: Vec<serde_json::Value>,
    #[serde(default)]
    pub context: QueryContext,
}

impl BackendQuery {
    pub fn new(
        query_type: QueryType,
        data_source: DataSource,
        granularity: Granularity,
        intervals: Vec<Interval>,
    ) -> Self {
        Self {
            query_type,
            data_source,
            granularity,
            intervals,
            dimensions: Vec::new(),
            filter: None,
            aggregations: Vec::new(),
            post_aggregations: Vec::new(),
            context: QueryContext::default(),
        }
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn with_filter(mut self, filter: serde_json::Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    /// Physical tables this query reads
    pub fn table_names(&self) -> BTreeSet<String> {
        self.data_source.table_names()
    }

    /// Copy with `intervals` applied here and to every nested query
    pub fn with_all_intervals(&self, intervals: Vec<Interval>) -> Self {
        let mut query = self.clone();
        query.set_all_intervals(intervals);
        query
    }

    fn set_all_intervals(&mut self, intervals: Vec<Interval>) {
        if let DataSource::Query { query } = &mut self.data_source {
            query.set_all_intervals(intervals.clone());
        }
        self.intervals = intervals;
    }

    pub fn interval_list(&self) -> SimplifiedIntervalList {
        self.intervals.iter().copied().collect()
    }

    /// Innermost query of a nested query chain
    pub fn innermost(&self) -> &BackendQuery {
        match &self.data_source {
            DataSource::Query { query } => query.innermost(),
            _ => self,
        }
    }

    /// Query counting the rows this query would produce
    ///
    /// The inner query keeps this query's data source, filter, dimensions and
    /// granularity but computes only a row count; the outer query sums those
    /// counts into a single row at the `all` grain.
    pub fn weight_evaluation(&self) -> BackendQuery {
        let mut inner = self.clone();
        inner.query_type = QueryType::GroupBy;
        inner.aggregations = vec![Aggregation::count(WEIGHT_COUNT_COLUMN)];
        inner.post_aggregations.clear();
        inner.context.if_none_match = None;

        let mut outer = BackendQuery::new(
            QueryType::GroupBy,
            DataSource::Query {
                query: Box::new(inner),
            },
            Granularity::All,
            self.intervals.clone(),
        )
        .with_aggregation(Aggregation::long_sum(
            WEIGHT_COUNT_COLUMN,
            WEIGHT_COUNT_COLUMN,
        ));
        outer.context = self.context.clone();
        outer.context.if_none_match = None;
        outer
    }
}
