use dashmap::DashMap;
use std::sync::Arc;

use super::backend::{CacheBackend, CacheProvider};

/// Lazily creates and keeps one backend per region for a single tier.
pub struct ProviderRegistry {
    provider: Arc<dyn CacheProvider>,
    caches: DashMap<String, Arc<dyn CacheBackend>>,
}

impl ProviderRegistry {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            caches: DashMap::new(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Backend for `region`, creating it on first use.
    ///
    /// Creation happens under the map's entry lock, so concurrent first
    /// callers all receive the same instance.
    pub fn get_or_create(&self, region: &str) -> Arc<dyn CacheBackend> {
        if let Some(existing) = self.caches.get(region) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .caches
            .entry(region.to_string())
            .or_insert_with(|| {
                tracing::debug!(region = %region, provider = self.provider.name(), "creating cache region");
                self.provider.provide(region)
            });
        Arc::clone(entry.value())
    }

    /// Backend for `region` if it was already created.
    pub fn get(&self, region: &str) -> Option<Arc<dyn CacheBackend>> {
        self.caches.get(region).map(|entry| Arc::clone(entry.value()))
    }

    pub fn regions(&self) -> Vec<String> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Close every backend, then the provider.
    pub async fn close(&self) {
        let backends: Vec<Arc<dyn CacheBackend>> = self
            .caches
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.caches.clear();
        for backend in backends {
            backend.close().await;
        }
        self.provider.close().await;
    }
}
