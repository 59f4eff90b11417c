//! Query result caching
//!
//! Entries are keyed by a digest of the canonical query (see [`cache_key`])
//! and come in three flavours, selected by [`CacheStrategy`]:
//! - raw: the serialized response alone
//! - signature: the response plus a digest of the segments it was computed
//!   from; a hit only counts while that segment set is unchanged
//! - etag: the response plus the backend's entity tag, revalidated with
//!   `If-None-Match` on every read

mod key;
mod memory;
mod signing;

pub use key::{cache_key, canonical_query};
pub use memory::MokaCacheStore;
pub use signing::QuerySigningService;

use crate::{Error, Result};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Key-value store holding serialized responses
///
/// Safe for concurrent use; no ordering is promised between a `get` and a
/// `set` on the same key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Entry stored together with a validation token
    async fn get_with_token(&self, key: &str) -> Result<Option<(String, Bytes)>>;

    async fn set_with_token(&self, key: &str, token: &str, value: Bytes) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    None,
    #[default]
    Raw,
    Signature,
    Etag,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::None => "none",
            CacheStrategy::Raw => "raw",
            CacheStrategy::Signature => "signature",
            CacheStrategy::Etag => "etag",
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CacheStrategy::None)
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CacheStrategy::None),
            "raw" => Ok(CacheStrategy::Raw),
            "signature" => Ok(CacheStrategy::Signature),
            "etag" => Ok(CacheStrategy::Etag),
            other => Err(Error::Config(format!(
                "unknown cache strategy '{}', expected one of none, raw, signature, etag",
                other
            ))),
        }
    }
}
