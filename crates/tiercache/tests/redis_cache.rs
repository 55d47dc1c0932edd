//! Integration tests for the Redis-backed tiers.
//!
//! These tests verify the two-tier caching system:
//! - L1 (moka): local in-memory cache
//! - L2 (Redis): shared cache across instances, plus pub/sub invalidation
//!
//! Tests use testcontainers to spin up a real Redis instance. Each test uses
//! its own regions since the container is shared.

use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache::{
    AppConfig, CacheKey, RedisConfig, SentinelConfig, Tier, TieredCache, create_tiered_cache,
};
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn redis_config(url: String) -> AppConfig {
    AppConfig {
        redis: RedisConfig {
            enabled: true,
            url,
            pool_size: 5,
            timeout_ms: 5000,
            key_ttl_secs: None,
            sentinel: None,
        },
        ..AppConfig::default()
    }
}

async fn connect(config: &AppConfig) -> TieredCache {
    let cache = create_tiered_cache(config).await.expect("create cache");
    assert!(cache.wait_subscribed(Duration::from_secs(5)).await);
    cache
}

fn remote_provider(cache: &TieredCache) -> &'static str {
    cache.tiers().registry(Tier::Remote).provider_name()
}

#[tokio::test]
async fn test_redis_cache_connection() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    assert_eq!(remote_provider(&cache), "redis");
    cache.close().await;
}

#[tokio::test]
async fn test_redis_cache_get_set() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    cache.put("get_set", "key", "redis_test_value").await;

    let element = cache.get::<String>("get_set", "key").await;
    assert_eq!(element.value.as_deref(), Some("redis_test_value"));
    assert_eq!(element.tier, Some(Tier::Local));
    assert_eq!(
        cache.remote_keys("get_set").await,
        Some(vec![CacheKey::from("key")])
    );
    cache.close().await;
}

#[tokio::test]
async fn test_redis_cache_l1_l2_promotion() {
    let config = redis_config(get_redis_url().await);

    // Two instances simulate two servers
    let cache1 = connect(&config).await;
    let cache2 = connect(&config).await;

    cache1.put("promotion", 1, "promotion_value").await;

    // Get from cache2 - should retrieve from L2 (Redis) and promote to L1
    let first = cache2.get::<String>("promotion", 1).await;
    assert_eq!(first.value.as_deref(), Some("promotion_value"));
    assert_eq!(first.tier, Some(Tier::Remote));

    // Second get should hit L1
    let second = cache2.get::<String>("promotion", 1).await;
    assert_eq!(second.tier, Some(Tier::Local));

    cache1.close().await;
    cache2.close().await;
}

#[tokio::test]
async fn test_redis_cross_instance_invalidation() {
    let config = redis_config(get_redis_url().await);
    let cache1 = connect(&config).await;
    let cache2 = connect(&config).await;

    cache1.put("invalidation", 7, "v1").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache2.get::<String>("invalidation", 7).await.is_hit());
    assert_eq!(cache2.keys("invalidation").await, vec![CacheKey::from(7)]);

    cache1.put("invalidation", 7, "v2").await;

    let mut dropped = false;
    for _ in 0..50 {
        if cache2.keys("invalidation").await.is_empty() {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(dropped, "peer L1 was not invalidated");

    let element = cache2.get::<String>("invalidation", 7).await;
    assert_eq!(element.value.as_deref(), Some("v2"));
    assert_eq!(element.tier, Some(Tier::Remote));

    cache1.close().await;
    cache2.close().await;
}

#[tokio::test]
async fn test_redis_evict_removes_both_tiers() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    cache.put("evict", "k", "value").await;
    assert!(cache.get::<String>("evict", "k").await.is_hit());

    cache.evict("evict", "k").await;

    assert!(!cache.get::<String>("evict", "k").await.is_hit());
    assert_eq!(cache.remote_keys("evict").await, Some(vec![]));
    cache.close().await;
}

#[tokio::test]
async fn test_redis_clear_is_region_scoped() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    for i in 0..10 {
        cache.put("clear_a", i, "a").await;
    }
    cache.put("clear_b", 1, "b").await;

    cache.clear("clear_a").await.expect("clear");

    assert_eq!(cache.remote_keys("clear_a").await, Some(vec![]));
    assert!(cache.keys("clear_a").await.is_empty());
    assert_eq!(
        cache.remote_keys("clear_b").await,
        Some(vec![CacheKey::from(1)])
    );
    cache.close().await;
}

#[tokio::test]
async fn test_redis_clear_leaves_nested_region_names() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    cache.put("nest:S", "x", "nested").await;
    cache.put("nest", "S:x", "outer").await;

    cache.clear("nest").await.expect("clear");

    assert_eq!(
        cache.remote_keys("nest:S").await,
        Some(vec![CacheKey::from("x")])
    );
    assert_eq!(cache.remote_keys("nest").await, Some(vec![]));
    cache.close().await;
}

#[tokio::test]
async fn test_redis_key_types_do_not_collide() {
    let config = redis_config(get_redis_url().await);
    let cache = connect(&config).await;

    cache.put("types", 42, "number").await;
    cache.put("types", "42", "text").await;

    let mut keys = cache.remote_keys("types").await.expect("scan supported");
    keys.sort();
    assert_eq!(keys, vec![CacheKey::from(42), CacheKey::from("42")]);
    cache.close().await;
}

#[tokio::test]
async fn test_redis_key_ttl() {
    let mut config = redis_config(get_redis_url().await);
    config.redis.key_ttl_secs = Some(1);
    let writer = connect(&config).await;

    writer.put("ttl", 1, "short lived").await;
    assert_eq!(writer.remote_keys("ttl").await.map(|k| k.len()), Some(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let reader = connect(&config).await;
    assert!(!reader.get::<String>("ttl", 1).await.is_hit());

    writer.close().await;
    reader.close().await;
}

#[tokio::test]
async fn test_redis_close_keeps_shared_data() {
    let config = redis_config(get_redis_url().await);
    let cache1 = connect(&config).await;
    cache1.put("close", 1, "kept").await;
    cache1.close().await;

    let cache2 = connect(&config).await;
    let element = cache2.get::<String>("close", 1).await;
    assert_eq!(element.value.as_deref(), Some("kept"));
    cache2.close().await;
}

#[tokio::test]
async fn test_graceful_degradation_unreachable_redis() {
    let mut config = redis_config("redis://nonexistent:9999".to_string());
    config.redis.timeout_ms = 1000;

    // Should fall back to the process-local remote tier
    let cache = create_tiered_cache(&config).await.expect("fallback cache");
    assert_eq!(remote_provider(&cache), "memory");

    // But should still work
    cache.put("fallback", "key", "fallback_value").await;
    let element = cache.get::<String>("fallback", "key").await;
    assert_eq!(element.value.as_deref(), Some("fallback_value"));
    cache.close().await;
}

#[tokio::test]
async fn test_graceful_degradation_unreachable_sentinel() {
    let mut config = redis_config(String::new());
    config.redis.timeout_ms = 500;
    config.redis.sentinel = Some(SentinelConfig {
        master: "mymaster".to_string(),
        nodes: vec!["127.0.0.1:1".to_string()],
        password: None,
        db: 0,
    });

    let cache = create_tiered_cache(&config).await.expect("fallback cache");
    assert_eq!(remote_provider(&cache), "memory");

    cache.put("sentinel_fallback", 1, "v").await;
    assert!(cache.get::<String>("sentinel_fallback", 1).await.is_hit());
    cache.close().await;
}

#[tokio::test]
async fn test_redis_disabled() {
    let config = AppConfig::default();
    let cache = create_tiered_cache(&config).await.expect("local cache");

    assert_eq!(remote_provider(&cache), "memory");
    assert!(cache.wait_subscribed(Duration::from_secs(2)).await);
    cache.close().await;
}

#[tokio::test]
async fn test_malformed_redis_url_is_fatal() {
    let config = redis_config("definitely not a url".to_string());
    assert!(create_tiered_cache(&config).await.is_err());
}
