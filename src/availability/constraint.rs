//! Column constraints used to ask availability questions

use std::collections::{BTreeMap, BTreeSet};

/// The columns (and dimension filter values) a query needs from a data source
///
/// Dimensions named only in filters count as required columns too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceConstraint {
    request_dimensions: BTreeSet<String>,
    filter_dimensions: BTreeSet<String>,
    metrics: BTreeSet<String>,
    filter_values: BTreeMap<String, BTreeSet<String>>,
}

impl DataSourceConstraint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_dimensions
            .extend(dimensions.into_iter().map(Into::into));
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

    /// Require `dimension` and restrict it to `values`
    pub fn with_filter<I, S>(mut self, dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dimension = dimension.into();
        self.filter_dimensions.insert(dimension.clone());
        self.filter_values
            .entry(dimension)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Grouping and filter dimensions together
    pub fn dimensions(&self) -> BTreeSet<String> {
        self.request_dimensions
            .union(&self.filter_dimensions)
            .cloned()
            .collect()
    }

    pub fn metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    pub fn all_column_names(&self) -> BTreeSet<String> {
        let mut names = self.dimensions();
        names.extend(self.metrics.iter().cloned());
        names
    }

    /// Values a dimension filter allows, when that dimension is filtered
    pub fn filter_values(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.filter_values.get(dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.request_dimensions.is_empty()
            && self.filter_dimensions.is_empty()
            && self.metrics.is_empty()
    }

    /// Same constraint with metrics narrowed to those in `metrics`
    pub fn with_metric_intersection(&self, metrics: &BTreeSet<String>) -> Self {
        let mut narrowed = self.clone();
        narrowed.metrics = self.metrics.intersection(metrics).cloned().collect();
        narrowed
    }

    /// Same constraint keeping only columns accepted by `keep`
    pub fn retain_columns<F>(&self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self {
            request_dimensions: self
                .request_dimensions
                .iter()
                .filter(|c| keep(c))
                .cloned()
                .collect(),
            filter_dimensions: self
                .filter_dimensions
                .iter()
                .filter(|c| keep(c))
                .cloned()
                .collect(),
            metrics: self.metrics.iter().filter(|c| keep(c)).cloned().collect(),
            filter_values: self
                .filter_values
                .iter()
                .filter(|(c, _)| keep(c))
                .map(|(c, v)| (c.clone(), v.clone()))
                .collect(),
        }
    }

    /// Same constraint with every column name passed through `rename`
    pub fn rename_columns<F>(&self, rename: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        Self {
            request_dimensions: self.request_dimensions.iter().map(|c| rename(c)).collect(),
            filter_dimensions: self.filter_dimensions.iter().map(|c| rename(c)).collect(),
            metrics: self.metrics.iter().map(|c| rename(c)).collect(),
            filter_values: self
                .filter_values
                .iter()
                .map(|(c, v)| (rename(c), v.clone()))
                .collect(),
        }
    }
}
