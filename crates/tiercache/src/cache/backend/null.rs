use async_trait::async_trait;
use std::sync::Arc;
use tiercache_core::{CacheKey, Result};

use super::{CacheBackend, CacheProvider, CachedBytes};

/// Backend that stores nothing. Used to disable the local tier.
pub struct NullCache {
    region: String,
}

impl NullCache {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_value(&self, _key: &CacheKey) -> Option<CachedBytes> {
        None
    }

    async fn put(&self, _key: &CacheKey, _value: CachedBytes) {}

    async fn evict(&self, _key: &CacheKey) {}

    async fn evict_many(&self, _keys: &[CacheKey]) {}

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn keys(&self) -> Option<Vec<CacheKey>> {
        Some(Vec::new())
    }

    async fn close(&self) {}
}

pub struct NullProvider;

#[async_trait]
impl CacheProvider for NullProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn provide(&self, region: &str) -> Arc<dyn CacheBackend> {
        Arc::new(NullCache::new(region))
    }
}
