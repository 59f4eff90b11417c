//! Partitioned availability: a predicate per source selects participants

use super::{merge_column_maps, Availability, DataSourceConstraint};
use crate::interval::{Interval, SimplifiedIntervalList};
use crate::Result;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Decides whether a source takes part in answering a constraint
pub trait DataSourceFilter: Send + Sync + fmt::Debug {
    fn accepts(&self, constraint: &DataSourceConstraint) -> bool;
}

/// Participates in every query
#[derive(Debug, Default, Clone, Copy)]
pub struct AllConstraints;

impl DataSourceFilter for AllConstraints {
    fn accepts(&self, _constraint: &DataSourceConstraint) -> bool {
        true
    }
}

/// Participates unless the query filters `dimension` to values this source
/// does not hold
#[derive(Debug, Clone)]
pub struct DimensionValueFilter {
    dimension: String,
    values: BTreeSet<String>,
}

impl DimensionValueFilter {
    pub fn new<I, S>(dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimension: dimension.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl DataSourceFilter for DimensionValueFilter {
    fn accepts(&self, constraint: &DataSourceConstraint) -> bool {
        match constraint.filter_values(&self.dimension) {
            Some(wanted) => !wanted.is_disjoint(&self.values),
            None => true,
        }
    }
}

/// One participant of a [`PartitionAvailability`]
#[derive(Debug, Clone)]
pub struct PartitionSource {
    availability: Arc<dyn Availability>,
    filter: Arc<dyn DataSourceFilter>,
    valid_from: Option<DateTime<Utc>>,
}

impl PartitionSource {
    pub fn new(availability: Arc<dyn Availability>, filter: Arc<dyn DataSourceFilter>) -> Self {
        Self {
            availability,
            filter,
            valid_from: None,
        }
    }

    /// Disregard this source's data before `floor`
    pub fn valid_from(mut self, floor: DateTime<Utc>) -> Self {
        self.valid_from = Some(floor);
        self
    }

    fn clip(&self, list: SimplifiedIntervalList) -> SimplifiedIntervalList {
        match self.valid_from {
            Some(floor) => match Interval::new(floor, DateTime::<Utc>::MAX_UTC) {
                Ok(window) => list.intersect(&SimplifiedIntervalList::single(window)),
                Err(_) => SimplifiedIntervalList::new(),
            },
            None => list,
        }
    }
}

/// Intersection over the sources whose filter accepts the constraint
///
/// When no source accepts, nothing is available.
#[derive(Debug, Clone)]
pub struct PartitionAvailability {
    sources: Vec<PartitionSource>,
}

impl PartitionAvailability {
    pub fn new(sources: Vec<PartitionSource>) -> Self {
        Self { sources }
    }

    fn participants<'a>(
        &'a self,
        constraint: &'a DataSourceConstraint,
    ) -> impl Iterator<Item = &'a PartitionSource> + 'a {
        self.sources
            .iter()
            .filter(move |source| source.filter.accepts(constraint))
    }
}

impl Availability for PartitionAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|source| source.availability.data_source_names())
            .collect()
    }

    fn data_source_names_for(&self, constraint: &DataSourceConstraint) -> BTreeSet<String> {
        self.participants(constraint)
            .flat_map(|source| source.availability.data_source_names())
            .collect()
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        let maps = self
            .sources
            .iter()
            .map(|source| {
                let columns = source.availability.all_available_intervals()?;
                Ok(columns
                    .into_iter()
                    .map(|(column, list)| (column, source.clip(list)))
                    .collect())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(merge_column_maps(maps, |a, b| a.intersect(b)))
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        let lists = self
            .participants(constraint)
            .map(|source| {
                source
                    .availability
                    .available_intervals(constraint)
                    .map(|list| source.clip(list))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SimplifiedIntervalList::intersect_all(&lists))
    }

    fn is_strict(&self) -> bool {
        self.sources
            .iter()
            .all(|source| source.availability.is_strict())
    }
}
