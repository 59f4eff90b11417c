//! # querygate
//!
//! A query-serving layer that sits in front of a segment-based columnar
//! time-series store.
//!
//! Each request passes down a chain of handlers before anything reaches the
//! backend, and each answer passes back up through matching response
//! processors.
//!
//! ## Key Features
//!
//! - **Availability tracking**: per-column interval coverage derived from
//!   segment metadata, composable across unions, partitions and time windows
//! - **Partial-data annotation**: requests learn which buckets are missing or
//!   still volatile
//! - **Splitting**: one sub-query per grain bucket, merged back in order
//! - **Caching**: raw, segment-signature or entity-tag validated
//! - **Admission control**: a cheap weight query rejects oversized requests
//!
//! ## Layout
//!
//! - [`interval`]: intervals, normalized interval lists and granularities
//! - [`metadata`]: segment snapshots, refresh loop and volatile intervals
//! - [`availability`]: the availability model and its compositions
//! - [`handler`] / [`processor`]: the request and response chains
//! - [`gateway`]: the entry point wiring them together

pub mod availability;
pub mod backend;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod handler;
pub mod interval;
pub mod metadata;
pub mod processor;
pub mod request;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::availability::{
        Availability, AvailabilityRegistry, ConcreteAvailability, DataSourceConstraint,
    };
    pub use crate::backend::{BackendClient, BackendRegistry, BackendResponse, HttpBackendClient};
    pub use crate::cache::{CacheStore, CacheStrategy, MokaCacheStore};
    pub use crate::config::{GatewayConfig, WeightThresholds};
    pub use crate::gateway::{GatewayComponents, GatewayResponse, QueryGateway};
    pub use crate::handler::{RoutingBackendSelector, RoutingRule, SingleBackendSelector};
    pub use crate::interval::{Granularity, Interval, SimplifiedIntervalList};
    pub use crate::metadata::{DataSourceMetadata, DataSourceMetadataService, SegmentInfo};
    pub use crate::request::{ApiRequest, BackendQuery, DataSource, QueryType};
    pub use crate::{Error, Result};
}
