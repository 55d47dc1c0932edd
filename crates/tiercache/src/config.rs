use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use tiercache_core::{CacheError, SerializerKind};

use crate::cache::backend::LocalBackend;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Tier and region configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Redis configuration (remote tier and invalidation broker)
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        self.cache.validate()?;
        self.redis.validate()?;
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(CacheError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// Redis configuration for the shared tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. Without it the remote tier is process-local and
    /// invalidations never leave the process.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://:secret@localhost:6379/2")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Bound on pool waits, connects and every command, in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Optional TTL applied to remote entries, in seconds
    #[serde(default)]
    pub key_ttl_secs: Option<u64>,

    /// Sentinel topology. When set, `url` is ignored and the master is
    /// discovered through the sentinels.
    #[serde(default)]
    pub sentinel: Option<SentinelConfig>,
}

/// Redis Sentinel settings (`[redis.sentinel]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Name of the monitored master
    pub master: String,

    /// Sentinel addresses, `host:port` or `redis://host:port`
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Password of the master (not of the sentinels)
    #[serde(default)]
    pub password: Option<String>,

    /// Database index on the master
    #[serde(default)]
    pub db: i64,
}

impl SentinelConfig {
    /// Sentinel addresses as connection URLs.
    pub fn node_urls(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| {
                if node.contains("://") {
                    node.clone()
                } else {
                    format!("redis://{node}")
                }
            })
            .collect()
    }
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_ttl_secs: None,
            sentinel: None,
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        match &self.sentinel {
            Some(sentinel) => {
                if sentinel.master.trim().is_empty() {
                    return Err(CacheError::configuration(
                        "redis.sentinel.master must not be empty",
                    ));
                }
                if sentinel.nodes.is_empty() {
                    return Err(CacheError::configuration(
                        "redis.sentinel.nodes must list at least one sentinel",
                    ));
                }
            }
            None if self.url.trim().is_empty() => {
                return Err(CacheError::configuration("redis.url must not be empty"));
            }
            None => {}
        }
        if self.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(CacheError::configuration("redis.timeout_ms must be > 0"));
        }
        if self.key_ttl_secs == Some(0) {
            return Err(CacheError::configuration("redis.key_ttl_secs must be > 0"));
        }
        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Encoding for values and invalidation keys; must match across processes
    #[serde(default)]
    pub serializer: SerializerKind,

    /// Local tier engine ("moka" or "null")
    #[serde(default)]
    pub local: LocalBackend,

    /// Region whose policy applies to regions without their own entry
    #[serde(default = "default_region_name")]
    pub default_region: String,

    /// Per-region local tier policies
    #[serde(default)]
    pub regions: HashMap<String, RegionConfig>,
}

fn default_region_name() -> String {
    "default".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            serializer: SerializerKind::default(),
            local: LocalBackend::default(),
            default_region: default_region_name(),
            regions: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Local tier policy for `region`, falling back to the default region.
    pub fn policy_for(&self, region: &str) -> RegionConfig {
        self.regions
            .get(region)
            .or_else(|| self.regions.get(&self.default_region))
            .cloned()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.default_region.is_empty() {
            return Err(CacheError::configuration(
                "cache.default_region must not be empty",
            ));
        }
        for (name, region) in &self.regions {
            if region.max_entries == 0 {
                return Err(CacheError::configuration(format!(
                    "cache.regions.{name}.max_entries must be > 0"
                )));
            }
            if region.ttl_secs == Some(0) || region.tti_secs == Some(0) {
                return Err(CacheError::configuration(format!(
                    "cache.regions.{name} ttl_secs/tti_secs must be > 0"
                )));
            }
        }
        Ok(())
    }
}

/// Local tier sizing and expiration for one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Maximum number of entries before capacity eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Time to live after write, in seconds
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Time to idle after last access, in seconds
    #[serde(default)]
    pub tti_secs: Option<u64>,
}

fn default_max_entries() -> u64 {
    10000
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: None,
            tti_secs: None,
        }
    }
}

impl RegionConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn tti(&self) -> Option<Duration> {
        self.tti_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;
    use tiercache_core::CacheError;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, CacheError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("tiercache.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., TIERCACHE__REDIS__POOL_SIZE=20
        builder = builder.add_source(
            Environment::with_prefix("TIERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
