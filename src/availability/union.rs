//! Availabilities that merge several sources

use super::{merge_column_maps, Availability, DataSourceConstraint};
use crate::interval::SimplifiedIntervalList;
use crate::{Error, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn names_of(sources: &[Arc<dyn Availability>]) -> BTreeSet<String> {
    sources
        .iter()
        .flat_map(|source| source.data_source_names())
        .collect()
}

fn union_of(
    sources: &[Arc<dyn Availability>],
    constraint: &DataSourceConstraint,
) -> Result<SimplifiedIntervalList> {
    let lists = sources
        .iter()
        .map(|source| source.available_intervals(constraint))
        .collect::<Result<Vec<_>>>()?;
    Ok(SimplifiedIntervalList::union_all(&lists))
}

fn union_columns(sources: &[Arc<dyn Availability>]) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
    let maps = sources
        .iter()
        .map(|source| source.all_available_intervals())
        .collect::<Result<Vec<_>>>()?;
    Ok(merge_column_maps(maps, |a, b| a.union(b)))
}

/// Union of same-schema sources holding disjoint or overlapping time ranges
#[derive(Debug, Clone)]
pub struct PureUnionAvailability {
    sources: Vec<Arc<dyn Availability>>,
}

impl PureUnionAvailability {
    pub fn new(sources: Vec<Arc<dyn Availability>>) -> Self {
        Self { sources }
    }
}

impl Availability for PureUnionAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        names_of(&self.sources)
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        union_columns(&self.sources)
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        union_of(&self.sources, constraint)
    }

    fn is_strict(&self) -> bool {
        self.sources.iter().all(|source| source.is_strict())
    }
}

/// Union where only the representative sources determine the intervals
///
/// Supplementary sources are still queried, so their names are visible, but
/// their coverage never widens or narrows the answer.
#[derive(Debug, Clone)]
pub struct RepresentativeUnionAvailability {
    representatives: Vec<Arc<dyn Availability>>,
    supplements: Vec<Arc<dyn Availability>>,
}

impl RepresentativeUnionAvailability {
    pub fn new(
        representatives: Vec<Arc<dyn Availability>>,
        supplements: Vec<Arc<dyn Availability>>,
    ) -> Result<Self> {
        if representatives.is_empty() {
            return Err(Error::Config(
                "a representative union needs at least one representative source".to_string(),
            ));
        }
        Ok(Self {
            representatives,
            supplements,
        })
    }

    /// Left union: the first source alone decides
    pub fn left(left: Arc<dyn Availability>, rights: Vec<Arc<dyn Availability>>) -> Self {
        Self {
            representatives: vec![left],
            supplements: rights,
        }
    }
}

impl Availability for RepresentativeUnionAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        let mut names = names_of(&self.representatives);
        names.extend(names_of(&self.supplements));
        names
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        union_columns(&self.representatives)
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        union_of(&self.representatives, constraint)
    }

    fn is_strict(&self) -> bool {
        self.representatives.iter().all(|source| source.is_strict())
    }
}

#[derive(Debug, Clone)]
struct MetricSource {
    availability: Arc<dyn Availability>,
    metrics: BTreeSet<String>,
}

/// Sources sharing dimensions, each owning a disjoint set of metrics
///
/// Only the sources owning a requested metric participate, and each is asked
/// about its own metrics only. Requested metrics no source owns are dropped.
#[derive(Debug, Clone)]
pub struct MetricUnionAvailability {
    sources: Vec<MetricSource>,
    owner_of: BTreeMap<String, usize>,
}

impl MetricUnionAvailability {
    pub fn new(sources: Vec<(Arc<dyn Availability>, BTreeSet<String>)>) -> Result<Self> {
        let mut owner_of = BTreeMap::new();
        for (idx, (availability, metrics)) in sources.iter().enumerate() {
            for metric in metrics {
                if let Some(previous) = owner_of.insert(metric.clone(), idx) {
                    return Err(Error::Config(format!(
                        "metric '{}' is provided by more than one source ({:?} and {:?})",
                        metric,
                        sources[previous].0.data_source_names(),
                        availability.data_source_names()
                    )));
                }
            }
        }

        Ok(Self {
            sources: sources
                .into_iter()
                .map(|(availability, metrics)| MetricSource {
                    availability,
                    metrics,
                })
                .collect(),
            owner_of,
        })
    }

    fn participants(&self, constraint: &DataSourceConstraint) -> BTreeSet<usize> {
        constraint
            .metrics()
            .iter()
            .filter_map(|metric| self.owner_of.get(metric).copied())
            .collect()
    }
}

impl Availability for MetricUnionAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|source| source.availability.data_source_names())
            .collect()
    }

    fn data_source_names_for(&self, constraint: &DataSourceConstraint) -> BTreeSet<String> {
        self.participants(constraint)
            .into_iter()
            .flat_map(|idx| self.sources[idx].availability.data_source_names())
            .collect()
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        let maps = self
            .sources
            .iter()
            .map(|source| {
                let mut columns = source.availability.all_available_intervals()?;
                // Metrics a source does not own never leak into the union
                columns.retain(|column, _| {
                    source.metrics.contains(column) || !self.owner_of.contains_key(column)
                });
                Ok(columns)
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
            .into_iter()
            .map(|idx| {
                let source = &self.sources[idx];
                source
                    .availability
                    .available_intervals(&constraint.with_metric_intersection(&source.metrics))
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
