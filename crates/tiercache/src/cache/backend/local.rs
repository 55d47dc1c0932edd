//! Moka-based local tier.
//!
//! One bounded moka cache per region, sized from the region's policy. Entries
//! removed by capacity or TTL/TTI are reported to the [`ExpirationListener`]
//! so the remote tier and peer processes can drop them too.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{CacheKey, Result};

use super::{CacheBackend, CacheProvider, CachedBytes, ExpirationListener};
use crate::config::{CacheConfig, RegionConfig};

/// Local cache for one region.
pub struct LocalCache {
    region: String,
    cache: Cache<CacheKey, CachedBytes>,
}

impl LocalCache {
    pub fn new(
        region: &str,
        policy: &RegionConfig,
        listener: Option<Arc<dyn ExpirationListener>>,
    ) -> Self {
        Self::with_expiry(
            region,
            policy.max_entries,
            policy.ttl(),
            policy.tti(),
            listener,
        )
    }

    /// Build a region cache from explicit limits, including sub-second ones.
    pub fn with_expiry(
        region: &str,
        max_entries: u64,
        ttl: Option<Duration>,
        tti: Option<Duration>,
        listener: Option<Arc<dyn ExpirationListener>>,
    ) -> Self {
        let mut builder = Cache::<CacheKey, CachedBytes>::builder().max_capacity(max_entries);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        if let Some(tti) = tti {
            builder = builder.time_to_idle(tti);
        }
        if let Some(listener) = listener {
            let owner = region.to_string();
            builder = builder.eviction_listener(move |key, _value, cause| {
                // Explicit removals and replacements are already broadcast by the caller.
                if cause.was_evicted() {
                    listener.on_expired(&owner, (*key).clone());
                }
            });
        }

        tracing::debug!(
            region = %region,
            max_entries,
            ttl = ?ttl,
            tti = ?tti,
            "local cache region created"
        );

        Self {
            region: region.to_string(),
            cache: builder.build(),
        }
    }

    /// Approximate entry count; exact after pending tasks have run.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_value(&self, key: &CacheKey) -> Option<CachedBytes> {
        self.cache.get(key).await
    }

    async fn put(&self, key: &CacheKey, value: CachedBytes) {
        self.cache.insert(key.clone(), value).await;
    }

    async fn evict(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    async fn evict_many(&self, keys: &[CacheKey]) {
        for key in keys {
            self.cache.invalidate(key).await;
        }
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn keys(&self) -> Option<Vec<CacheKey>> {
        Some(self.cache.iter().map(|(key, _)| (*key).clone()).collect())
    }

    async fn close(&self) {
        self.cache.invalidate_all();
    }

    async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Creates a [`LocalCache`] per region from the configured policies.
pub struct MokaProvider {
    config: CacheConfig,
    listener: Arc<dyn ExpirationListener>,
}

impl MokaProvider {
    pub fn new(config: CacheConfig, listener: Arc<dyn ExpirationListener>) -> Self {
        Self { config, listener }
    }
}

#[async_trait]
impl CacheProvider for MokaProvider {
    fn name(&self) -> &'static str {
        "moka"
    }

    fn provide(&self, region: &str) -> Arc<dyn CacheBackend> {
        let policy = self.config.policy_for(region);
        Arc::new(LocalCache::new(region, &policy, Some(Arc::clone(&self.listener))))
    }
}
