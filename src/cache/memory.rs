//! In-process cache store backed by moka

use super::CacheStore;
use crate::Result;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CachedEntry {
    token: Option<String>,
    value: Bytes,
}

/// Size-bounded in-memory [`CacheStore`]
///
/// Eviction is moka's; entries are weighed by payload bytes.
pub struct MokaCacheStore {
    entries: Cache<String, Arc<CachedEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MokaCacheStore {
    pub fn new(capacity_bytes: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|key: &String, entry: &Arc<CachedEntry>| {
                let weight = key.len()
                    + entry.value.len()
                    + entry.token.as_ref().map_or(0, String::len);
                u32::try_from(weight).unwrap_or(u32::MAX)
            })
            .build();
        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries currently held, after pending evictions are applied
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    async fn lookup(&self, key: &str) -> Option<Arc<CachedEntry>> {
        let entry = self.entries.get(key).await;
        let counter = if entry.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        entry
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.lookup(key).await.map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries
            .insert(key.to_string(), Arc::new(CachedEntry { token: None, value }))
            .await;
        Ok(())
    }

    async fn get_with_token(&self, key: &str) -> Result<Option<(String, Bytes)>> {
        Ok(self.lookup(key).await.and_then(|entry| {
            entry
                .token
                .as_ref()
                .map(|token| (token.clone(), entry.value.clone()))
        }))
    }

    async fn set_with_token(&self, key: &str, token: &str, value: Bytes) -> Result<()> {
        self.entries
            .insert(
                key.to_string(),
                Arc::new(CachedEntry {
                    token: Some(token.to_string()),
                    value,
                }),
            )
            .await;
        Ok(())
    }
}
