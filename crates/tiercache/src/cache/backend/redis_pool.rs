//! Connection pools for a standalone Redis or a Sentinel-managed master.
//!
//! Both topologies hand out connections that implement
//! [`redis::aio::ConnectionLike`], so the Redis tier and the pub/sub
//! transport do not care which one is configured.

use deadpool_redis::{PoolError, Runtime, sentinel};
use redis::aio::ConnectionLike;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{Cmd, Pipeline, RedisConnectionInfo, RedisFuture, RedisResult, Value};
use tiercache_core::{CacheError, Result};

use crate::config::{RedisConfig, SentinelConfig};

/// Shared connection pool for the remote tier.
#[derive(Clone)]
pub enum RedisPool {
    Standalone {
        pool: deadpool_redis::Pool,
        url: String,
    },
    Sentinel {
        pool: sentinel::Pool,
        nodes: Vec<String>,
        master: String,
        node_info: SentinelNodeConnectionInfo,
    },
}

/// A pooled connection from either topology.
pub enum RedisConnection {
    Standalone(deadpool_redis::Connection),
    Sentinel(sentinel::Connection),
}

/// Create the shared connection pool. Does not connect.
pub fn create_redis_pool(config: &RedisConfig) -> Result<RedisPool> {
    match &config.sentinel {
        Some(sentinel) => create_sentinel_pool(config, sentinel),
        None => create_standalone_pool(config),
    }
}

fn create_standalone_pool(config: &RedisConfig) -> Result<RedisPool> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
    }

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::configuration(format!("failed to create Redis pool: {e}")))?;
    Ok(RedisPool::Standalone {
        pool,
        url: config.url.clone(),
    })
}

fn create_sentinel_pool(config: &RedisConfig, sentinel: &SentinelConfig) -> Result<RedisPool> {
    let nodes = sentinel.node_urls();
    let node_info = SentinelNodeConnectionInfo {
        tls_mode: None,
        redis_connection_info: Some(RedisConnectionInfo {
            db: sentinel.db,
            password: sentinel.password.clone(),
            ..RedisConnectionInfo::default()
        }),
    };

    let manager = sentinel::Manager::new(
        nodes.clone(),
        sentinel.master.clone(),
        Some(node_info.clone()),
        sentinel::SentinelServerType::Master,
    )
    .map_err(|e| CacheError::configuration(format!("invalid Redis Sentinel nodes: {e}")))?;

    let pool = sentinel::Pool::builder(manager)
        .max_size(config.pool_size)
        .wait_timeout(Some(config.timeout()))
        .create_timeout(Some(config.timeout()))
        .recycle_timeout(Some(config.timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| {
            CacheError::configuration(format!("failed to create Redis Sentinel pool: {e}"))
        })?;

    tracing::debug!(
        master = %sentinel.master,
        sentinels = nodes.len(),
        "Redis Sentinel pool created"
    );
    Ok(RedisPool::Sentinel {
        pool,
        nodes,
        master: sentinel.master.clone(),
        node_info,
    })
}

impl RedisPool {
    pub fn topology(&self) -> &'static str {
        match self {
            Self::Standalone { .. } => "standalone",
            Self::Sentinel { .. } => "sentinel",
        }
    }

    pub async fn get(&self) -> std::result::Result<RedisConnection, PoolError> {
        match self {
            Self::Standalone { pool, .. } => pool.get().await.map(RedisConnection::Standalone),
            Self::Sentinel { pool, .. } => pool.get().await.map(RedisConnection::Sentinel),
        }
    }

    pub fn close(&self) {
        match self {
            Self::Standalone { pool, .. } => pool.close(),
            Self::Sentinel { pool, .. } => pool.close(),
        }
    }

    /// Client for a dedicated (non-pooled) connection to the current master.
    pub async fn client(&self) -> RedisResult<redis::Client> {
        match self {
            Self::Standalone { url, .. } => redis::Client::open(url.as_str()),
            Self::Sentinel {
                nodes,
                master,
                node_info,
                ..
            } => {
                let mut sentinel = Sentinel::build(nodes.clone())?;
                sentinel.async_master_for(master, Some(node_info)).await
            }
        }
    }
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Standalone(conn) => conn.req_packed_command(cmd),
            Self::Sentinel(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Standalone(conn) => conn.req_packed_commands(cmd, offset, count),
            Self::Sentinel(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Standalone(conn) => conn.get_db(),
            Self::Sentinel(conn) => conn.get_db(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel_config(nodes: Vec<&str>) -> RedisConfig {
        RedisConfig {
            enabled: true,
            url: String::new(),
            timeout_ms: 200,
            sentinel: Some(SentinelConfig {
                master: "mymaster".to_string(),
                nodes: nodes.into_iter().map(String::from).collect(),
                password: Some("secret".to_string()),
                db: 2,
            }),
            ..RedisConfig::default()
        }
    }

    #[test]
    fn test_create_pool_rejects_malformed_url() {
        let config = RedisConfig {
            enabled: true,
            url: "not a url".to_string(),
            ..RedisConfig::default()
        };
        let err = create_redis_pool(&config).err().unwrap();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_standalone_pool() {
        let config = RedisConfig {
            enabled: true,
            ..RedisConfig::default()
        };
        let pool = create_redis_pool(&config).unwrap();
        assert_eq!(pool.topology(), "standalone");
        assert!(pool.client().await.is_ok());
    }

    #[tokio::test]
    async fn test_sentinel_pool_does_not_connect_eagerly() {
        let pool = create_redis_pool(&sentinel_config(vec!["127.0.0.1:1"])).unwrap();
        assert_eq!(pool.topology(), "sentinel");
        let RedisPool::Sentinel {
            nodes,
            master,
            node_info,
            ..
        } = &pool
        else {
            panic!("expected a sentinel pool");
        };
        assert_eq!(nodes, &vec!["redis://127.0.0.1:1".to_string()]);
        assert_eq!(master, "mymaster");
        let info = node_info.redis_connection_info.as_ref().unwrap();
        assert_eq!(info.db, 2);
        assert_eq!(info.password.as_deref(), Some("secret"));

        // No sentinel listens there: connections fail, creation does not
        assert!(pool.get().await.is_err());
        assert!(pool.client().await.is_err());
        pool.close();
    }

    #[test]
    fn test_sentinel_pool_rejects_malformed_node() {
        let err = create_redis_pool(&sentinel_config(vec!["redis://bad host:x"]))
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
