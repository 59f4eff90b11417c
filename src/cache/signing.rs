//! Segment-set signatures for signature-validated cache entries

use crate::metadata::DataSourceMetadataService;
use crate::request::BackendQuery;
use crate::Result;

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Digests the identifiers of the segments a query would read
///
/// When a segment is added, replaced or dropped anywhere inside the query's
/// intervals the signature changes, invalidating entries stored under the old
/// one.
pub struct QuerySigningService {
    metadata: Arc<DataSourceMetadataService>,
}

impl QuerySigningService {
    pub fn new(metadata: Arc<DataSourceMetadataService>) -> Self {
        Self { metadata }
    }

    pub fn segment_signature(&self, query: &BackendQuery) -> Result<String> {
        let intervals = query.innermost().interval_list();
        let mut hasher = Sha256::new();
        for table in query.table_names() {
            let snapshot = self.metadata.snapshot(&table)?;
            let identifiers: BTreeSet<&str> = snapshot
                .segments_overlapping(&intervals)
                .into_iter()
                .map(|segment| segment.identifier.as_str())
                .collect();

            hasher.update(table.as_bytes());
            hasher.update([0u8]);
            for identifier in identifiers {
                hasher.update(identifier.as_bytes());
                hasher.update([0u8]);
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
