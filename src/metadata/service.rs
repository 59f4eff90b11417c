//! Concurrent per-table segment metadata store

use super::{DataSourceMetadata, SegmentInfo};
use crate::interval::SimplifiedIntervalList;
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Segments keyed by interval start, then by segment identifier
pub type SegmentsByTime = BTreeMap<DateTime<Utc>, BTreeMap<String, SegmentInfo>>;

/// Everything known about one table as of one refresh
///
/// Snapshots are immutable; a refresh publishes a new one.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub segments_by_time: SegmentsByTime,
    pub intervals_by_column: BTreeMap<String, SimplifiedIntervalList>,
    pub refreshed_at: DateTime<Utc>,
}

impl TableSnapshot {
    fn build(name: &str, metadata: &DataSourceMetadata) -> Self {
        let mut segments_by_time = SegmentsByTime::new();
        for segment in metadata.visible_segments() {
            segments_by_time
                .entry(segment.interval.start())
                .or_default()
                .insert(segment.identifier.clone(), segment.clone());
        }

        Self {
            name: name.to_string(),
            properties: metadata.properties.clone(),
            segments_by_time,
            intervals_by_column: metadata.intervals_by_column(),
            refreshed_at: Utc::now(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments_by_time.values().map(BTreeMap::len).sum()
    }

    /// Visible segments whose interval overlaps any of `intervals`, ordered by start
    pub fn segments_overlapping(&self, intervals: &SimplifiedIntervalList) -> Vec<&SegmentInfo> {
        let Some(span) = intervals.span() else {
            return Vec::new();
        };
        self.segments_by_time
            .range(..span.end())
            .flat_map(|(_, by_id)| by_id.values())
            .filter(|segment| intervals.overlaps(&segment.interval))
            .collect()
    }
}

/// Process-wide table-name → metadata snapshot registry
///
/// Each table's entry is a single `Arc<TableSnapshot>` that is swapped whole on
/// refresh, so a reader sees either the previous or the new snapshot for a
/// table and never a mix of both.
#[derive(Debug, Default)]
pub struct DataSourceMetadataService {
    tables: DashMap<String, Arc<TableSnapshot>>,
}

impl DataSourceMetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot for `table`
    pub fn update(&self, table: &str, metadata: DataSourceMetadata) {
        let snapshot = Arc::new(TableSnapshot::build(table, &metadata));
        debug!(
            table,
            segments = snapshot.segment_count(),
            columns = snapshot.intervals_by_column.len(),
            "Publishing metadata snapshot"
        );
        self.tables.insert(table.to_string(), snapshot);
    }

    /// Current snapshot for `table`
    ///
    /// A table that has never been loaded is a configuration error, not an
    /// empty table.
    pub fn snapshot(&self, table: &str) -> Result<Arc<TableSnapshot>> {
        self.tables
            .get(table)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::Metadata(format!(
                    "table '{table}' is not loaded in the data source metadata service"
                ))
            })
    }

    /// Column → merged availability for `table`
    pub fn available_intervals_by_table(
        &self,
        table: &str,
    ) -> Result<BTreeMap<String, SimplifiedIntervalList>> {
        Ok(self.snapshot(table)?.intervals_by_column.clone())
    }

    /// Snapshots for several tables, failing on the first unknown one
    pub fn snapshots<'a, I>(&self, tables: I) -> Result<Vec<Arc<TableSnapshot>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        tables.into_iter().map(|table| self.snapshot(table)).collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn remove(&self, table: &str) -> Option<Arc<TableSnapshot>> {
        self.tables.remove(table).map(|(_, snapshot)| snapshot)
    }
}
