//! Error types for querygate

use thiserror::Error;

/// Result type alias for querygate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for querygate
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Serialization errors (query canonicalization, cache payloads)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client-side query errors (nothing to run, malformed request)
    #[error("Query error: {0}")]
    Query(String),

    /// Metadata errors, including tables the metadata service has never seen
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Internal protocol violation (split accounting, merge slots)
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Backend answered with an HTTP-level error
    #[error("Backend error {status} {reason}: {body}")]
    Backend {
        status: u16,
        reason: String,
        body: String,
    },

    /// Backend could not be reached or the exchange broke down
    #[error("Backend transport error: {0}")]
    Transport(String),

    /// Backend coverage disagrees with the availability model
    #[error("Data consistency error: {0}")]
    DataConsistency(String),

    /// Admission control rejected the query
    #[error("Query weight {estimated} exceeds the limit of {limit} rows")]
    CapacityExceeded { estimated: u64, limit: u64 },

    /// Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Request budget exhausted
    #[error("Operation timed out")]
    Timeout,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the caller should see for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Query(_) => 400,
            Error::Backend { status, .. } => *status,
            Error::Transport(_) => 502,
            Error::Timeout => 504,
            Error::CapacityExceeded { .. } => 507,
            Error::Serialization(_)
            | Error::Config(_)
            | Error::Metadata(_)
            | Error::Protocol(_)
            | Error::DataConsistency(_)
            | Error::Cache(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Whether resubmitting the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout => true,
            Error::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Stable label used for telemetry attributes
    pub fn class(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Query(_) => "query",
            Error::Metadata(_) => "metadata",
            Error::Protocol(_) => "protocol",
            Error::Backend { .. } => "backend",
            Error::Transport(_) => "transport",
            Error::DataConsistency(_) => "data_consistency",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::Cache(_) => "cache",
            Error::Timeout => "timeout",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
