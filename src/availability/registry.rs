//! Logical table name → availability

use super::Availability;
use crate::{Error, Result};

use std::collections::HashMap;
use std::sync::Arc;

/// Availabilities built once at table-configuration time
#[derive(Debug, Default, Clone)]
pub struct AvailabilityRegistry {
    tables: HashMap<String, Arc<dyn Availability>>,
}

impl AvailabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: impl Into<String>, availability: Arc<dyn Availability>) {
        self.tables.insert(table.into(), availability);
    }

    pub fn with_table(
        mut self,
        table: impl Into<String>,
        availability: Arc<dyn Availability>,
    ) -> Self {
        self.register(table, availability);
        self
    }

    /// Availability for `table`; an unconfigured table is a hard error
    pub fn get(&self, table: &str) -> Result<Arc<dyn Availability>> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| Error::Metadata(format!("no availability configured for table '{}'", table)))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
