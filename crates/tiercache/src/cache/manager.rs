use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiercache_core::{CacheKey, Result, Tier};

use super::backend::{CacheBackend, CacheProvider, CachedBytes};
use super::registry::ProviderRegistry;

/// Routes region operations to the local or remote tier.
///
/// Every method is a no-op for an empty region name and after [`close`].
///
/// [`close`]: TierManager::close
pub struct TierManager {
    local: ProviderRegistry,
    remote: ProviderRegistry,
    closed: AtomicBool,
}

impl TierManager {
    pub fn new(local: Arc<dyn CacheProvider>, remote: Arc<dyn CacheProvider>) -> Self {
        Self {
            local: ProviderRegistry::new(local),
            remote: ProviderRegistry::new(remote),
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self, tier: Tier) -> &ProviderRegistry {
        match tier {
            Tier::Local => &self.local,
            Tier::Remote => &self.remote,
        }
    }

    fn backend(&self, tier: Tier, region: &str) -> Option<Arc<dyn CacheBackend>> {
        if region.is_empty() || self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(self.registry(tier).get_or_create(region))
    }

    pub async fn get(&self, tier: Tier, region: &str, key: &CacheKey) -> Option<CachedBytes> {
        self.backend(tier, region)?.get_value(key).await
    }

    pub async fn set(&self, tier: Tier, region: &str, key: &CacheKey, value: CachedBytes) {
        if let Some(backend) = self.backend(tier, region) {
            backend.put(key, value).await;
        }
    }

    pub async fn evict(&self, tier: Tier, region: &str, key: &CacheKey) {
        if let Some(backend) = self.backend(tier, region) {
            backend.evict(key).await;
        }
    }

    pub async fn batch_evict(&self, tier: Tier, region: &str, keys: &[CacheKey]) {
        if keys.is_empty() {
            return;
        }
        if let Some(backend) = self.backend(tier, region) {
            backend.evict_many(keys).await;
        }
    }

    pub async fn clear(&self, tier: Tier, region: &str) -> Result<()> {
        match self.backend(tier, region) {
            Some(backend) => backend.clear().await,
            None => Ok(()),
        }
    }

    /// Keys of `region` in `tier`; `None` if the tier cannot enumerate.
    pub async fn keys(&self, tier: Tier, region: &str) -> Option<Vec<CacheKey>> {
        match self.backend(tier, region) {
            Some(backend) => backend.keys().await,
            None => Some(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close both tiers. Only the first call has an effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.local.close().await;
        self.remote.close().await;
        tracing::debug!("cache tiers closed");
    }
}
