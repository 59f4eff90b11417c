//! Segment records and per-refresh data source snapshots

use crate::interval::{Interval, SimplifiedIntervalList};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// How a segment's interval is partitioned across shards
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShardSpec {
    /// Single, unsharded segment
    None,
    /// Open-ended linear sharding (no declared partition count)
    Linear {
        #[serde(rename = "partitionNum")]
        partition_num: u32,
    },
    /// Numbered sharding with a declared number of core partitions
    Numbered {
        #[serde(rename = "partitionNum")]
        partition_num: u32,
        partitions: u32,
    },
    /// Hash-based sharding with a declared number of partitions
    Hashed {
        #[serde(rename = "partitionNum")]
        partition_num: u32,
        partitions: u32,
    },
}

impl ShardSpec {
    pub fn partition_num(&self) -> u32 {
        match self {
            ShardSpec::None => 0,
            ShardSpec::Linear { partition_num }
            | ShardSpec::Numbered { partition_num, .. }
            | ShardSpec::Hashed { partition_num, .. } => *partition_num,
        }
    }

    /// Number of partitions that must all be loaded for the interval to be complete
    pub fn core_partitions(&self) -> Option<u32> {
        match self {
            ShardSpec::Numbered { partitions, .. } | ShardSpec::Hashed { partitions, .. } => {
                Some(*partitions)
            }
            ShardSpec::None | ShardSpec::Linear { .. } => None,
        }
    }
}

impl Default for ShardSpec {
    fn default() -> Self {
        ShardSpec::None
    }
}

/// Immutable description of one loaded backend segment
///
/// Identity for deduplication is `identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInfo {
    pub data_source: String,
    pub interval: Interval,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub version: String,
    #[serde(default)]
    pub shard_spec: ShardSpec,
    #[serde(default)]
    pub size: u64,
    pub identifier: String,
}

impl SegmentInfo {
    /// Create a segment, deriving the identifier the way the backend names segments
    pub fn new(
        data_source: impl Into<String>,
        interval: Interval,
        version: impl Into<String>,
        shard_spec: ShardSpec,
    ) -> Self {
        let data_source = data_source.into();
        let version = version.into();
        let identifier = format!(
            "{}_{}_{}_{}_{}",
            data_source,
            interval.start().to_rfc3339(),
            interval.end().to_rfc3339(),
            version,
            shard_spec.partition_num()
        );
        Self {
            data_source,
            interval,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            version,
            shard_spec,
            size: 0,
            identifier,
        }
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Every column this segment carries data for
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.dimensions.iter().chain(self.metrics.iter())
    }
}

/// Snapshot of a data source's segment metadata taken at one refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSourceMetadata {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub segments: Vec<SegmentInfo>,
}

impl DataSourceMetadata {
    pub fn new(name: impl Into<String>, segments: Vec<SegmentInfo>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
            segments,
        }
    }

    /// Valid snapshot of a data source that currently has no segments
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Segments that are actually served for each interval
    ///
    /// Within one segment interval only the newest version is visible, and a
    /// version whose shard spec declares core partitions is dropped until all
    /// of them are present. A complete newer version also hides older
    /// segments lying inside its interval, so a reindexed month replaces the
    /// daily segments it covers. Duplicate identifiers collapse to one entry.
    pub fn visible_segments(&self) -> Vec<&SegmentInfo> {
        let mut by_interval: BTreeMap<Interval, Vec<&SegmentInfo>> = BTreeMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for segment in &self.segments {
            if seen.insert(segment.identifier.as_str()) {
                by_interval.entry(segment.interval).or_default().push(segment);
            }
        }

        let mut complete: Vec<(Interval, &str, Vec<&SegmentInfo>)> = Vec::new();
        for (interval, segments) in by_interval {
            let Some(newest) = segments.iter().copied().map(|s| s.version.as_str()).max() else {
                continue;
            };
            let current: Vec<&SegmentInfo> = segments
                .iter()
                .copied()
                .filter(|s| s.version == newest)
                .collect();

            let required = current
                .iter()
                .filter_map(|s| s.shard_spec.core_partitions())
                .max();
            if let Some(required) = required {
                let present: BTreeSet<u32> = current
                    .iter()
                    .map(|s| s.shard_spec.partition_num())
                    .filter(|num| *num < required)
                    .collect();
                if present.len() < required as usize {
                    debug!(
                        data_source = %self.name,
                        interval = %interval,
                        version = newest,
                        present = present.len(),
                        required,
                        "Skipping interval with incomplete partitions"
                    );
                    continue;
                }
            }

            complete.push((interval, newest, current));
        }

        let mut visible = Vec::new();
        for (interval, version, segments) in &complete {
            let overshadowed = complete
                .iter()
                .any(|(other, newer, _)| newer > version && other.contains(interval));
            if overshadowed {
                debug!(
                    data_source = %self.name,
                    interval = %interval,
                    version,
                    "Segments overshadowed by a newer version"
                );
                continue;
            }
            visible.extend(segments.iter().copied());
        }
        visible
    }

    /// Merged availability per column, built from the visible segments
    pub fn intervals_by_column(&self) -> BTreeMap<String, SimplifiedIntervalList> {
        let mut raw: BTreeMap<String, Vec<Interval>> = BTreeMap::new();
        for segment in self.visible_segments() {
            for column in segment.columns() {
                raw.entry(column.clone()).or_default().push(segment.interval);
            }
        }

        raw.into_iter()
            .map(|(column, intervals)| (column, SimplifiedIntervalList::from_intervals(intervals)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::test_interval as iv;

    fn segment(day: (&str, &str), version: &str, shard: ShardSpec) -> SegmentInfo {
        SegmentInfo::new("wiki", iv(day.0, day.1), version, shard)
            .with_dimensions(["page"])
            .with_metrics(["added"])
    }

    #[test]
    fn test_intervals_by_column_merges_adjacent_segments() {
        let metadata = DataSourceMetadata::new(
            "wiki",
            vec![
                segment(("2020-01-01", "2020-01-02"), "v1", ShardSpec::None),
                segment(("2020-01-02", "2020-01-03"), "v1", ShardSpec::None),
            ],
        );
        let columns = metadata.intervals_by_column();
        assert_eq!(columns.len(), 2);
        assert_eq!(
            columns["page"],
            SimplifiedIntervalList::single(iv("2020-01-01", "2020-01-03"))
        );
    }

    #[test]
    fn test_incomplete_partitions_are_not_available() {
        let metadata = DataSourceMetadata::new(
            "wiki",
            vec![
                segment(
                    ("2020-01-01", "2020-01-02"),
                    "v1",
                    ShardSpec::Numbered { partition_num: 0, partitions: 2 },
                ),
                segment(
                    ("2020-01-02", "2020-01-03"),
                    "v1",
                    ShardSpec::Numbered { partition_num: 0, partitions: 2 },
                ),
                segment(
                    ("2020-01-02", "2020-01-03"),
                    "v1",
                    ShardSpec::Numbered { partition_num: 1, partitions: 2 },
                ),
            ],
        );
        assert_eq!(
            metadata.intervals_by_column()["added"],
            SimplifiedIntervalList::single(iv("2020-01-02", "2020-01-03"))
        );
    }

    #[test]
    fn test_newest_version_overshadows() {
        let old = segment(("2020-01-01", "2020-01-02"), "2020-01-05", ShardSpec::None)
            .with_metrics(["added", "deleted"]);
        let new = segment(("2020-01-01", "2020-01-02"), "2020-02-01", ShardSpec::None);
        let metadata = DataSourceMetadata::new("wiki", vec![old, new]);

        let columns = metadata.intervals_by_column();
        assert!(columns.contains_key("added"));
        assert!(!columns.contains_key("deleted"));
    }

    #[test]
    fn test_newer_wide_segment_overshadows_contained_segments() {
        let metadata = DataSourceMetadata::new(
            "wiki",
            vec![
                segment(("2020-01-01", "2020-01-02"), "v1", ShardSpec::None)
                    .with_metrics(["added", "deleted"]),
                segment(("2020-01-02", "2020-01-03"), "v1", ShardSpec::None)
                    .with_metrics(["added", "deleted"]),
                segment(("2020-01-03", "2020-01-04"), "v1", ShardSpec::None)
                    .with_metrics(["added", "deleted"]),
                segment(("2020-01-01", "2020-01-03"), "v2", ShardSpec::None),
            ],
        );

        let visible: Vec<_> = metadata
            .visible_segments()
            .into_iter()
            .map(|s| (s.interval, s.version.clone()))
            .collect();
        assert_eq!(
            visible,
            vec![
                (iv("2020-01-01", "2020-01-03"), "v2".to_string()),
                (iv("2020-01-03", "2020-01-04"), "v1".to_string()),
            ]
        );
        assert_eq!(
            metadata.intervals_by_column()["deleted"],
            SimplifiedIntervalList::single(iv("2020-01-03", "2020-01-04"))
        );
    }

    #[test]
    fn test_incomplete_newer_version_does_not_overshadow() {
        let metadata = DataSourceMetadata::new(
            "wiki",
            vec![
                segment(("2020-01-01", "2020-01-02"), "v1", ShardSpec::None),
                segment(
                    ("2020-01-01", "2020-01-03"),
                    "v2",
                    ShardSpec::Numbered { partition_num: 0, partitions: 2 },
                ),
            ],
        );
        let visible = metadata.visible_segments();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].version, "v1");
    }

    #[test]
    fn test_duplicate_identifiers_collapse() {
        let s = segment(("2020-01-01", "2020-01-02"), "v1", ShardSpec::None);
        let metadata = DataSourceMetadata::new("wiki", vec![s.clone(), s]);
        assert_eq!(metadata.visible_segments().len(), 1);
    }

    #[test]
    fn test_shard_spec_wire_format() {
        let spec: ShardSpec =
            serde_json::from_str(r#"{"type":"numbered","partitionNum":1,"partitions":3}"#).unwrap();
        assert_eq!(spec.partition_num(), 1);
        assert_eq!(spec.core_partitions(), Some(3));
    }
}
