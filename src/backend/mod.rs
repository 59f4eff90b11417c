//! Backend store client
//!
//! A [`BackendClient`] executes one [`BackendQuery`] and answers with exactly
//! one outcome: rows, an HTTP-level error, or a transport failure.

mod http;

pub use http::HttpBackendClient;

use crate::interval::Interval;
use crate::request::BackendQuery;
use crate::{Error, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Coverage gaps the backend itself reported for a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncoveredIntervals {
    #[serde(default, rename = "uncoveredIntervals")]
    pub intervals: Vec<Interval>,
    #[serde(default, rename = "uncoveredIntervalsOverflowed")]
    pub overflowed: bool,
}

impl UncoveredIntervals {
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty() && !self.overflowed
    }

    pub fn merge(&mut self, other: UncoveredIntervals) {
        self.intervals.extend(other.intervals);
        self.overflowed |= other.overflowed;
    }
}

/// A successful backend answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub rows: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncovered: Option<UncoveredIntervals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// The backend confirmed a cached entity is still current; `rows` is empty
    #[serde(skip)]
    pub not_modified: bool,
}

impl BackendResponse {
    pub fn new(rows: Vec<serde_json::Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn not_modified(etag: Option<String>) -> Self {
        Self {
            etag,
            not_modified: true,
            ..Self::default()
        }
    }

    pub fn with_uncovered(mut self, uncovered: UncoveredIntervals) -> Self {
        self.uncovered = Some(uncovered);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Whether the backend admitted to missing any data
    pub fn has_uncovered(&self) -> bool {
        self.uncovered.as_ref().is_some_and(|u| !u.is_empty())
    }
}

/// Non-success outcomes of a backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Http {
        status: u16,
        reason: String,
        body: String,
    },
    Transport(String),
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Http {
                status,
                reason,
                body,
            } => Error::Backend {
                status,
                reason,
                body,
            },
            BackendError::Transport(msg) => Error::Transport(msg),
        }
    }
}

/// Executes queries against one backend endpoint
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn execute(&self, query: &BackendQuery) -> std::result::Result<BackendResponse, BackendError>;
}

/// Named backend endpoints
#[derive(Clone, Default)]
pub struct BackendRegistry {
    clients: HashMap<String, Arc<dyn BackendClient>>,
    default: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; the first one registered becomes the default
    pub fn register(mut self, name: impl Into<String>, client: Arc<dyn BackendClient>) -> Self {
        let name = name.into();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.clients.insert(name, client);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Client for `name`, or the default client when `name` is `None`
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn BackendClient>> {
        let name = name
            .or(self.default.as_deref())
            .ok_or_else(|| Error::Config("no backend configured".to_string()))?;
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown backend '{}'", name)))
    }
}
