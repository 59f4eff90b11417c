//! Availabilities backed directly by one table's segment metadata

use super::{Availability, DataSourceConstraint};
use crate::interval::SimplifiedIntervalList;
use crate::metadata::DataSourceMetadataService;
use crate::Result;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One backend table plus its (optional) configured column schema
#[derive(Debug, Clone)]
struct TableColumns {
    table: String,
    schema: Option<BTreeSet<String>>,
    metadata: Arc<DataSourceMetadataService>,
}

impl TableColumns {
    /// Constraint columns this table knows about; others are dropped
    fn resolve(&self, constraint: &DataSourceConstraint) -> BTreeSet<String> {
        let columns = constraint.all_column_names();
        match &self.schema {
            Some(schema) => columns.intersection(schema).cloned().collect(),
            None => columns,
        }
    }

    fn all(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        let mut available = self.metadata.available_intervals_by_table(&self.table)?;
        if let Some(schema) = &self.schema {
            available.retain(|column, _| schema.contains(column));
            for column in schema {
                available.entry(column.clone()).or_default();
            }
        }
        Ok(available)
    }

    /// Per-column lists for the resolved columns of `constraint`
    fn column_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<Vec<SimplifiedIntervalList>> {
        let snapshot = self.metadata.snapshot(&self.table)?;
        let columns = self.resolve(constraint);
        Ok(columns
            .iter()
            .map(|column| {
                snapshot
                    .intervals_by_column
                    .get(column)
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }
}

/// Strict availability: a range counts only if every required column has it
#[derive(Debug, Clone)]
pub struct ConcreteAvailability {
    inner: TableColumns,
}

impl ConcreteAvailability {
    pub fn new(table: impl Into<String>, metadata: Arc<DataSourceMetadataService>) -> Self {
        Self {
            inner: TableColumns {
                table: table.into(),
                schema: None,
                metadata,
            },
        }
    }

    /// Restrict the table to a configured column schema
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.schema = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }
}

impl Availability for ConcreteAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        BTreeSet::from([self.inner.table.clone()])
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        self.inner.all()
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        let lists = self.inner.column_intervals(constraint)?;
        Ok(SimplifiedIntervalList::intersect_all(&lists))
    }
}

/// Lenient availability: a range counts if any required column has it
///
/// Absence is read as "not yet known" rather than "excluded".
#[derive(Debug, Clone)]
pub struct PermissiveAvailability {
    inner: TableColumns,
}

impl PermissiveAvailability {
    pub fn new(table: impl Into<String>, metadata: Arc<DataSourceMetadataService>) -> Self {
        Self {
            inner: TableColumns {
                table: table.into(),
                schema: None,
                metadata,
            },
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.schema = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }
}

impl Availability for PermissiveAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        BTreeSet::from([self.inner.table.clone()])
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        self.inner.all()
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        let lists = self.inner.column_intervals(constraint)?;
        Ok(SimplifiedIntervalList::union_all(&lists))
    }

    fn is_strict(&self) -> bool {
        false
    }
}
