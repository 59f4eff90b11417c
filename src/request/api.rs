//! The already-validated API request a backend query was translated from

use crate::availability::DataSourceConstraint;
use crate::interval::{Granularity, Interval, SimplifiedIntervalList};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub column: String,
    pub direction: SortDirection,
}

impl SortColumn {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// 1-based page selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

/// Logical request: table, columns, grain and result shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub table: String,
    pub granularity: Granularity,
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Dimension → allowed values
    #[serde(default)]
    pub filters: BTreeMap<String, BTreeSet<String>>,
    /// Known distinct-value counts, used by the weight heuristic
    #[serde(default)]
    pub dimension_cardinalities: BTreeMap<String, u64>,
    #[serde(default)]
    pub sorts: Vec<SortColumn>,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default = "default_read_cache")]
    pub read_cache: bool,
}

fn default_read_cache() -> bool {
    true
}

impl ApiRequest {
    pub fn new(table: impl Into<String>, granularity: Granularity, intervals: Vec<Interval>) -> Self {
        Self {
            table: table.into(),
            granularity,
            intervals,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: BTreeMap::new(),
            dimension_cardinalities: BTreeMap::new(),
            sorts: Vec::new(),
            top_n: None,
            pagination: None,
            read_cache: true,
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

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics.extend(metrics.into_iter().map(Into::into));
        self
    }

    pub fn with_filter<I, S>(mut self, dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .entry(dimension.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_cardinality(mut self, dimension: impl Into<String>, cardinality: u64) -> Self {
        self.dimension_cardinalities
            .insert(dimension.into(), cardinality);
        self
    }

    pub fn with_sort(mut self, sort: SortColumn) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn with_pagination(mut self, page: usize, per_page: usize) -> Self {
        self.pagination = Some(Pagination { page, per_page });
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.read_cache = false;
        self
    }

    pub fn requested_intervals(&self) -> SimplifiedIntervalList {
        self.intervals.iter().copied().collect()
    }

    /// Columns and filter values the backend must hold to answer this request
    pub fn constraint(&self) -> DataSourceConstraint {
        self.filters.iter().fold(
            DataSourceConstraint::new()
                .with_dimensions(self.dimensions.iter().cloned())
                .with_metrics(self.metrics.iter().cloned()),
            |constraint, (dimension, values)| {
                constraint.with_filter(dimension.clone(), values.iter().cloned())
            },
        )
    }

    /// Upper bound on rows per time bucket, when every grouped dimension has
    /// a known cardinality
    ///
    /// A filtered dimension contributes at most its number of allowed values.
    pub fn cardinality_estimate(&self) -> Option<u64> {
        self.dimensions.iter().try_fold(1u64, |product, dimension| {
            let known = self.dimension_cardinalities.get(dimension).copied()?;
            let bound = match self.filters.get(dimension) {
                Some(values) => known.min(values.len() as u64),
                None => known,
            };
            Some(product.saturating_mul(bound))
        })
    }

    pub fn has_shaping(&self) -> bool {
        !self.sorts.is_empty() || self.top_n.is_some() || self.pagination.is_some()
    }
}
