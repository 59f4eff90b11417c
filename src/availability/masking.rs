//! Availability that hides and renames columns of another availability

use super::{Availability, DataSourceConstraint};
use crate::interval::SimplifiedIntervalList;
use crate::Result;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Exposes logical column names over a physical table
///
/// Hidden columns are dropped from constraints before they reach the inner
/// availability and never appear in its column map. Logical names without a
/// mapping pass through unchanged.
#[derive(Debug, Clone)]
pub struct ColumnMaskingAvailability {
    inner: Arc<dyn Availability>,
    hidden: BTreeSet<String>,
    physical_names: BTreeMap<String, String>,
}

impl ColumnMaskingAvailability {
    pub fn new(inner: Arc<dyn Availability>) -> Self {
        Self {
            inner,
            hidden: BTreeSet::new(),
            physical_names: BTreeMap::new(),
        }
    }

    pub fn hide<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Map logical column `logical` onto physical column `physical`
    pub fn rename(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.physical_names.insert(logical.into(), physical.into());
        self
    }

    fn physical<'a>(&'a self, logical: &'a str) -> &'a str {
        self.physical_names
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    fn to_physical(&self, constraint: &DataSourceConstraint) -> DataSourceConstraint {
        constraint
            .retain_columns(|column| !self.hidden.contains(column))
            .rename_columns(|column| self.physical(column).to_string())
    }
}

impl Availability for ColumnMaskingAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        self.inner.data_source_names()
    }

    fn data_source_names_for(&self, constraint: &DataSourceConstraint) -> BTreeSet<String> {
        self.inner.data_source_names_for(&self.to_physical(constraint))
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        let logical_of: BTreeMap<&str, &str> = self
            .physical_names
            .iter()
            .map(|(logical, physical)| (physical.as_str(), logical.as_str()))
            .collect();

        Ok(self
            .inner
            .all_available_intervals()?
            .into_iter()
            .map(|(column, list)| {
                let logical = logical_of
                    .get(column.as_str())
                    .map(|name| name.to_string())
                    .unwrap_or(column);
                (logical, list)
            })
            .filter(|(logical, _)| !self.hidden.contains(logical))
            .collect())
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        self.inner.available_intervals(&self.to_physical(constraint))
    }

    fn is_strict(&self) -> bool {
        self.inner.is_strict()
    }
}
