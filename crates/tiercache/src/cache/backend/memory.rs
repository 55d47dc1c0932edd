//! Process-local stand-in for the remote tier.
//!
//! Entries are kept under their qualified remote names, so a single
//! [`MemoryStore`] behaves like one shared Redis keyspace for every cache
//! that holds a clone of it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tiercache_core::{CacheKey, Result, remote_prefix};

use super::{CacheBackend, CacheProvider, CachedBytes, region_keys};

/// Shared keyspace. Clones refer to the same entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CachedBytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all regions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw lookup by qualified name.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

pub struct MemoryCache {
    region: String,
    store: MemoryStore,
}

impl MemoryCache {
    pub fn new(region: &str, store: MemoryStore) -> Self {
        Self {
            region: region.to_string(),
            store,
        }
    }

    fn name(&self, key: &CacheKey) -> String {
        key.remote_name(&self.region)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_value(&self, key: &CacheKey) -> Option<CachedBytes> {
        self.store
            .entries
            .get(&self.name(key))
            .map(|entry| Arc::clone(entry.value()))
    }

    async fn put(&self, key: &CacheKey, value: CachedBytes) {
        self.store.entries.insert(self.name(key), value);
    }

    async fn evict(&self, key: &CacheKey) {
        self.store.entries.remove(&self.name(key));
    }

    async fn evict_many(&self, keys: &[CacheKey]) {
        for key in keys {
            self.store.entries.remove(&self.name(key));
        }
    }

    async fn clear(&self) -> Result<()> {
        let prefix = remote_prefix(&self.region);
        self.store.entries.retain(|name, _| {
            !(name.starts_with(&prefix) && CacheKey::from_remote_name(&self.region, name).is_some())
        });
        Ok(())
    }

    async fn keys(&self) -> Option<Vec<CacheKey>> {
        let names: Vec<String> = self
            .store
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        Some(region_keys(&self.region, names.iter().map(String::as_str)))
    }

    async fn close(&self) {}
}

/// Hands out [`MemoryCache`] regions over one shared [`MemoryStore`].
pub struct MemoryProvider {
    store: MemoryStore,
}

impl MemoryProvider {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn provide(&self, region: &str) -> Arc<dyn CacheBackend> {
        Arc::new(MemoryCache::new(region, self.store.clone()))
    }
}
