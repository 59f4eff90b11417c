//! Data availability model
//!
//! An [`Availability`] answers "for which time ranges do we have data for
//! these columns". Concrete variants read through to the
//! [`DataSourceMetadataService`](crate::metadata::DataSourceMetadataService);
//! composite variants combine other availabilities:
//!
//! - [`ConcreteAvailability`]: intersection across the required columns
//! - [`PermissiveAvailability`]: union across the required columns
//! - [`PureUnionAvailability`]: union across sources
//! - [`RepresentativeUnionAvailability`]: a subset of sources decides
//! - [`MetricUnionAvailability`]: each source owns a disjoint set of metrics
//! - [`PartitionAvailability`]: a per-source predicate selects participants
//! - [`TimeFilteredAvailability`]: clipped to a fixed window
//! - [`ColumnMaskingAvailability`]: hides and renames columns
//!
//! A constraint that names no columns always yields empty availability.

mod concrete;
mod constraint;
mod filtered;
mod masking;
mod partition;
mod registry;
mod union;

pub use concrete::{ConcreteAvailability, PermissiveAvailability};
pub use constraint::DataSourceConstraint;
pub use filtered::TimeFilteredAvailability;
pub use masking::ColumnMaskingAvailability;
pub use partition::{
    AllConstraints, DataSourceFilter, DimensionValueFilter, PartitionAvailability, PartitionSource,
};
pub use registry::AvailabilityRegistry;
pub use union::{MetricUnionAvailability, PureUnionAvailability, RepresentativeUnionAvailability};

use crate::interval::SimplifiedIntervalList;
use crate::Result;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Column availability for one table
pub trait Availability: Send + Sync + fmt::Debug {
    /// Backend data sources this availability reads from
    fn data_source_names(&self) -> BTreeSet<String>;

    /// Backend data sources that would serve a query with `constraint`
    fn data_source_names_for(&self, _constraint: &DataSourceConstraint) -> BTreeSet<String> {
        self.data_source_names()
    }

    /// Column → availability, with no constraint applied
    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>>;

    /// Time ranges for which every part of `constraint` can be answered
    fn available_intervals(&self, constraint: &DataSourceConstraint)
        -> Result<SimplifiedIntervalList>;

    /// Whether missing data is treated as excluded (strict) or as not yet
    /// known (lenient)
    fn is_strict(&self) -> bool {
        true
    }

    /// Availability across every known column
    fn available_intervals_all_columns(&self) -> Result<SimplifiedIntervalList> {
        let columns = self.all_available_intervals()?;
        Ok(if self.is_strict() {
            SimplifiedIntervalList::intersect_all(columns.values())
        } else {
            SimplifiedIntervalList::union_all(columns.values())
        })
    }
}

/// Merge column maps, combining lists that appear in more than one map
pub(crate) fn merge_column_maps<F>(
    maps: Vec<BTreeMap<String, SimplifiedIntervalList>>,
    combine: F,
) -> BTreeMap<String, SimplifiedIntervalList>
where
    F: Fn(&SimplifiedIntervalList, &SimplifiedIntervalList) -> SimplifiedIntervalList,
{
    let mut merged: BTreeMap<String, SimplifiedIntervalList> = BTreeMap::new();
    for map in maps {
        for (column, intervals) in map {
            let combined = match merged.get(&column) {
                Some(existing) => combine(existing, &intervals),
                None => intervals,
            };
            merged.insert(column, combined);
        }
    }
    merged
}
