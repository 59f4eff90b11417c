//! Segment metadata for querygate
//!
//! Tracks which segments the backend currently serves for each table and
//! derives per-column availability from them. Also answers which ranges are
//! still volatile.

mod loader;
mod segment;
mod service;
mod volatile;

pub use loader::{HttpMetadataSource, MetadataLoader, MetadataSource, RefreshReport};
pub use segment::{DataSourceMetadata, SegmentInfo, ShardSpec};
pub use service::{DataSourceMetadataService, SegmentsByTime, TableSnapshot};
pub use volatile::{
    DefaultingVolatileIntervalsService, NoVolatileIntervals, TrailingVolatileIntervals,
    VolatileIntervalsFunction, VolatileIntervalsService,
};
