//! Availability clipped to a fixed window

use super::{Availability, DataSourceConstraint};
use crate::interval::{Interval, SimplifiedIntervalList};
use crate::Result;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Wraps another availability and only reports ranges inside `window`
#[derive(Debug, Clone)]
pub struct TimeFilteredAvailability {
    inner: Arc<dyn Availability>,
    window: SimplifiedIntervalList,
}

impl TimeFilteredAvailability {
    pub fn new(inner: Arc<dyn Availability>, window: SimplifiedIntervalList) -> Self {
        Self { inner, window }
    }

    /// Everything from `floor` onward
    pub fn since(inner: Arc<dyn Availability>, floor: DateTime<Utc>) -> Self {
        let window = Interval::new(floor, DateTime::<Utc>::MAX_UTC)
            .map(SimplifiedIntervalList::single)
            .unwrap_or_default();
        Self::new(inner, window)
    }

    pub fn window(&self) -> &SimplifiedIntervalList {
        &self.window
    }
}

impl Availability for TimeFilteredAvailability {
    fn data_source_names(&self) -> BTreeSet<String> {
        self.inner.data_source_names()
    }

    fn data_source_names_for(&self, constraint: &DataSourceConstraint) -> BTreeSet<String> {
        self.inner.data_source_names_for(constraint)
    }

    fn all_available_intervals(&self) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        Ok(self
            .inner
            .all_available_intervals()?
            .into_iter()
            .map(|(column, list)| (column, list.intersect(&self.window)))
            .collect())
    }

    fn available_intervals(
        &self,
        constraint: &DataSourceConstraint,
    ) -> Result<SimplifiedIntervalList> {
        Ok(self
            .inner
            .available_intervals(constraint)?
            .intersect(&self.window))
    }

    fn is_strict(&self) -> bool {
        self.inner.is_strict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::test_support::{list, load, service};
    use crate::availability::PermissiveAvailability;
    use chrono::TimeZone;

    #[test]
    fn test_clips_to_window() {
        let metadata = service();
        load(&metadata, "wiki", &[("2020-01-01", "2020-01-10", &["page"])]);
        let inner: Arc<dyn Availability> = Arc::new(PermissiveAvailability::new("wiki", metadata));

        let filtered = TimeFilteredAvailability::new(
            inner.clone(),
            list(&[("2020-01-02", "2020-01-03"), ("2020-01-08", "2020-01-20")]),
        );
        let constraint = DataSourceConstraint::new().with_dimensions(["page"]);
        assert_eq!(
            filtered.available_intervals(&constraint).unwrap(),
            list(&[("2020-01-02", "2020-01-03"), ("2020-01-08", "2020-01-10")])
        );
        assert!(!filtered.is_strict());

        let since = TimeFilteredAvailability::since(
            inner,
            Utc.with_ymd_and_hms(2020, 1, 9, 0, 0, 0).unwrap(),
        );
        assert_eq!(
            since.all_available_intervals().unwrap()["page"],
            list(&[("2020-01-09", "2020-01-10")])
        );
    }
}
