//! Region-scoped cache backends and the providers that create them.
//!
//! A [`CacheProvider`] hands out one [`CacheBackend`] per region. Local
//! providers are selected with [`LocalBackend`], remote ones with
//! [`RemoteBackend`]; both are resolved once at bootstrap.

mod local;
mod memory;
mod null;
mod redis_cache;
mod redis_pool;

pub use local::{LocalCache, MokaProvider};
pub use memory::{MemoryCache, MemoryProvider, MemoryStore};
pub use null::{NullCache, NullProvider};
pub use redis_cache::{RedisCache, RedisProvider};
pub use redis_pool::{RedisConnection, RedisPool, create_redis_pool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiercache_core::{CacheKey, Result};

use crate::config::CacheConfig;

/// Serialized value as stored in a tier. Cloning is a refcount bump.
pub type CachedBytes = Arc<Vec<u8>>;

/// Storage for a single region of one tier.
///
/// I/O failures are handled inside the backend: reads degrade to a miss and
/// writes to a no-op. Only [`CacheBackend::clear`] reports errors.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn region(&self) -> &str;

    async fn get_value(&self, key: &CacheKey) -> Option<CachedBytes>;

    async fn put(&self, key: &CacheKey, value: CachedBytes);

    async fn evict(&self, key: &CacheKey);

    async fn evict_many(&self, keys: &[CacheKey]);

    async fn clear(&self) -> Result<()>;

    /// Keys currently stored, or `None` if the engine cannot enumerate.
    async fn keys(&self) -> Option<Vec<CacheKey>>;

    async fn close(&self);

    /// Run deferred engine housekeeping, such as delivering expirations.
    async fn run_pending_tasks(&self) {}
}

/// Factory for region backends of one engine.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn provide(&self, region: &str) -> Arc<dyn CacheBackend>;

    /// Release engine-wide resources (pools, connections).
    async fn close(&self) {}
}

/// Notified when a local entry is removed by capacity or TTL/TTI eviction.
///
/// Called from the engine's housekeeping, so implementations must not block.
pub trait ExpirationListener: Send + Sync + 'static {
    fn on_expired(&self, region: &str, key: CacheKey);
}

/// Local tier engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalBackend {
    /// Bounded in-memory cache
    #[default]
    Moka,
    /// No local tier; every read goes to the remote tier
    Null,
}

impl LocalBackend {
    pub fn provider(
        &self,
        config: &CacheConfig,
        listener: Arc<dyn ExpirationListener>,
    ) -> Arc<dyn CacheProvider> {
        match self {
            Self::Moka => Arc::new(MokaProvider::new(config.clone(), listener)),
            Self::Null => Arc::new(NullProvider),
        }
    }
}

/// Remote tier engine.
#[derive(Clone)]
pub enum RemoteBackend {
    /// Shared Redis instance
    Redis(RedisProvider),
    /// Process-local store; shared only by caches holding the same store
    Memory(MemoryStore),
}

impl RemoteBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
        }
    }

    pub fn provider(self) -> Arc<dyn CacheProvider> {
        match self {
            Self::Redis(provider) => Arc::new(provider),
            Self::Memory(store) => Arc::new(MemoryProvider::new(store)),
        }
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteBackend").field(&self.kind()).finish()
    }
}

/// Keys of `region` among qualified remote names. Names that do not parse are skipped.
pub(crate) fn region_keys<'a, I>(region: &str, names: I) -> Vec<CacheKey>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter_map(|name| CacheKey::from_remote_name(region, name))
        .collect()
}
