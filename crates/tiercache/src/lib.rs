pub mod cache;
pub mod config;
pub mod metrics;
pub mod observability;

use std::sync::Arc;

pub use cache::{
    CacheBackend, CacheProvider, ChannelState, LocalBackend, MemoryPubSub, MemoryStore,
    PubSubTransport, RemoteBackend, TieredCache, TieredCacheBuilder,
};
pub use config::{
    AppConfig, CacheConfig, LoggingConfig, RedisConfig, RegionConfig, SentinelConfig,
};
pub use observability::init_tracing;
pub use tiercache_core::{
    CacheElement, CacheError, CacheKey, Command, INVALIDATION_CHANNEL, KeyPayload, Operator,
    Result, Serializer, SerializerKind, SourceId, Tier,
};

use cache::backend::{RedisProvider, create_redis_pool};
use cache::pubsub::RedisPubSub;

/// Load configuration, install logging and metrics, and build the cache.
///
/// `config_path` follows [`config::loader::load_config`]: a missing file
/// means defaults, and `TIERCACHE__*` environment variables override both.
pub async fn bootstrap(config_path: Option<&str>) -> Result<TieredCache> {
    let config = config::loader::load_config(config_path)?;
    observability::init_tracing(&config.logging);
    metrics::init_metrics();
    create_tiered_cache(&config).await
}

/// Create a tiered cache based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: L2 is a process-local store and invalidations stay
///   inside the process
/// - **Redis enabled**: L2 and invalidations go through Redis (standalone URL
///   or Sentinel); falls back to the process-local mode if Redis cannot be
///   reached
///
/// ## Graceful Degradation
///
/// An unreachable Redis does not prevent startup. An invalid configuration,
/// including a malformed Redis URL, does.
pub async fn create_tiered_cache(config: &AppConfig) -> Result<TieredCache> {
    config.validate()?;
    let builder = TieredCache::builder(config.cache.clone());

    if !config.redis.enabled {
        tracing::info!("Redis disabled, using process-local remote tier");
        return builder.build();
    }

    let pool = create_redis_pool(&config.redis)?;
    tracing::info!(
        pool_size = config.redis.pool_size,
        topology = pool.topology(),
        "Connecting to Redis"
    );
    let provider = RedisProvider::new(pool.clone(), &config.redis);

    match provider.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis successfully");
            builder
                .remote(RemoteBackend::Redis(provider))
                .transport(Arc::new(RedisPubSub::new(&config.redis, pool)))
                .publish_timeout(config.redis.timeout())
                .build()
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to process-local remote tier."
            );
            pool.close();
            builder.build()
        }
    }
}
