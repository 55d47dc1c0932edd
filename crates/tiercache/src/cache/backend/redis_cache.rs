//! Redis remote tier.
//!
//! Keys are stored under their qualified names (`region:T:key`, with the
//! region escaped) so regions and key types never collide in the shared
//! keyspace. Every command is bounded by the configured timeout; failures
//! are logged and degrade to a miss or a no-op, except for `clear`.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{CacheError, CacheKey, Result, remote_prefix};

use super::redis_pool::{RedisConnection, RedisPool};
use super::{CacheBackend, CacheProvider, CachedBytes, region_keys};
use crate::config::RedisConfig;

const SCAN_BATCH: usize = 500;

/// One region of the Redis tier.
pub struct RedisCache {
    region: String,
    pool: RedisPool,
    timeout: Duration,
    key_ttl: Option<u64>,
}

impl RedisCache {
    pub fn new(region: &str, pool: RedisPool, timeout: Duration, key_ttl: Option<u64>) -> Self {
        Self {
            region: region.to_string(),
            pool,
            timeout,
            key_ttl,
        }
    }

    fn name(&self, key: &CacheKey) -> String {
        key.remote_name(&self.region)
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::backend(
                &self.region,
                format!("Redis {op} error: {e}"),
            )),
            Err(_) => Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn connection(&self) -> Result<RedisConnection> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::backend(
                &self.region,
                format!("failed to get Redis connection: {e}"),
            )),
            Err(_) => Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn try_get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        self.bounded("GET", conn.get::<_, Option<Vec<u8>>>(name)).await
    }

    async fn try_put(&self, name: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.connection().await?;
        match self.key_ttl {
            Some(ttl) => {
                self.bounded("SETEX", conn.set_ex::<_, _, ()>(name, value, ttl))
                    .await
            }
            None => self.bounded("SET", conn.set::<_, _, ()>(name, value)).await,
        }
    }

    async fn try_del(&self, names: Vec<String>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded("DEL", conn.del::<_, ()>(names)).await
    }

    /// All names in this region via incremental SCAN.
    async fn scan_names(&self) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&remote_prefix(&self.region)));
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut names = Vec::new();
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) =
                self.bounded("SCAN", scan.query_async(&mut conn)).await?;
            names.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(names)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get_value(&self, key: &CacheKey) -> Option<CachedBytes> {
        let name = self.name(key);
        match self.try_get(&name).await {
            Ok(value) => value.map(Arc::new),
            Err(e) => {
                tracing::warn!(key = %name, error = %e, "Redis GET error");
                None
            }
        }
    }

    async fn put(&self, key: &CacheKey, value: CachedBytes) {
        let name = self.name(key);
        if let Err(e) = self.try_put(&name, &value).await {
            tracing::warn!(key = %name, error = %e, "Redis SET error");
        }
    }

    async fn evict(&self, key: &CacheKey) {
        let name = self.name(key);
        if let Err(e) = self.try_del(vec![name.clone()]).await {
            tracing::warn!(key = %name, error = %e, "Redis DEL error");
        }
    }

    async fn evict_many(&self, keys: &[CacheKey]) {
        let names: Vec<String> = keys.iter().map(|key| self.name(key)).collect();
        let count = names.len();
        if let Err(e) = self.try_del(names).await {
            tracing::warn!(region = %self.region, count, error = %e, "Redis DEL error");
        }
    }

    async fn clear(&self) -> Result<()> {
        let names: Vec<String> = self
            .scan_names()
            .await?
            .into_iter()
            .filter(|name| CacheKey::from_remote_name(&self.region, name).is_some())
            .collect();
        let count = names.len();
        for chunk in names.chunks(SCAN_BATCH) {
            self.try_del(chunk.to_vec()).await?;
        }
        tracing::debug!(region = %self.region, count, "Redis region cleared");
        Ok(())
    }

    async fn keys(&self) -> Option<Vec<CacheKey>> {
        match self.scan_names().await {
            Ok(names) => Some(region_keys(&self.region, names.iter().map(String::as_str))),
            Err(e) => {
                tracing::warn!(region = %self.region, error = %e, "Redis SCAN error");
                None
            }
        }
    }

    // The pool is shared by every region and closed by the provider.
    async fn close(&self) {}
}

/// Hands out [`RedisCache`] regions over one connection pool.
#[derive(Clone)]
pub struct RedisProvider {
    pool: RedisPool,
    timeout: Duration,
    key_ttl: Option<u64>,
}

impl RedisProvider {
    pub fn new(pool: RedisPool, config: &RedisConfig) -> Self {
        Self {
            pool,
            timeout: config.timeout(),
            key_ttl: config.key_ttl_secs,
        }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Check that a connection can be established and answers PING.
    pub async fn ping(&self) -> Result<()> {
        let pinger = RedisCache::new("ping", self.pool.clone(), self.timeout, None);
        let mut conn = pinger.connection().await?;
        let mut ping = redis::cmd("PING");
        ping.arg("tiercache");
        let _: String = pinger.bounded("PING", ping.query_async(&mut conn)).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheProvider for RedisProvider {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn provide(&self, region: &str) -> Arc<dyn CacheBackend> {
        Arc::new(RedisCache::new(
            region,
            self.pool.clone(),
            self.timeout,
            self.key_ttl,
        ))
    }

    async fn close(&self) {
        // Shared data is left in place for other processes.
        self.pool.close();
    }
}

/// Escape Redis glob metacharacters so a region matches literally.
fn escape_glob(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^' | '-') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
