//! Broker transports for cross-instance cache invalidation.
//!
//! ## How It Works
//!
//! ```text
//! Instance 1: cache.evict("orders", 42)
//!   ↓
//! Broker: PUBLISH tiercache:invalidate <command bytes>
//!   ↓
//! Instance 2: subscriber decodes the command → evicts "orders:42" from L1
//! Instance 3: subscriber decodes the command → evicts "orders:42" from L1
//! ```
//!
//! [`RedisPubSub`] publishes through the shared pool and subscribes on a
//! dedicated connection. [`MemoryPubSub`] is an in-process hub for single
//! instance deployments and tests.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{CacheError, Result};
use tokio::sync::broadcast;

use super::backend::RedisPool;
use crate::config::RedisConfig;

/// Raw message payloads received on a channel. Ends when the connection is lost.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;
}

/// Redis Pub/Sub transport.
pub struct RedisPubSub {
    pool: RedisPool,
    timeout: Duration,
}

impl RedisPubSub {
    pub fn new(config: &RedisConfig, pool: RedisPool) -> Self {
        Self {
            pool,
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::broker(format!("failed to get Redis connection: {e}")))?;

        match tokio::time::timeout(self.timeout, conn.publish::<_, _, ()>(channel, payload)).await
        {
            Ok(result) => result
                .map_err(|e| CacheError::broker(format!("failed to publish invalidation: {e}"))),
            Err(_) => Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        // Subscriptions need a dedicated connection outside the pool
        let client = match tokio::time::timeout(self.timeout, self.pool.client()).await {
            Ok(client) => client
                .map_err(|e| CacheError::broker(format!("failed to create Redis client: {e}")))?,
            Err(_) => return Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        };

        let mut pubsub = match tokio::time::timeout(self.timeout, client.get_async_pubsub()).await
        {
            Ok(conn) => conn
                .map_err(|e| CacheError::broker(format!("failed to get pub/sub connection: {e}")))?,
            Err(_) => return Err(CacheError::Timeout(self.timeout.as_millis() as u64)),
        };

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::broker(format!("failed to subscribe: {e}")))?;

        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed())
    }
}

/// In-process broadcast hub. Clones share the same hub.
#[derive(Clone)]
pub struct MemoryPubSub {
    hub: broadcast::Sender<(String, Arc<Vec<u8>>)>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (hub, _) = broadcast::channel(capacity);
        Self { hub }
    }

    /// Number of live subscriptions across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.hub.receiver_count()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        // No subscribers is not an error for a broadcast
        let _ = self.hub.send((channel.to_string(), Arc::new(payload)));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let rx = self.hub.subscribe();
        let channel = channel.to_string();
        let stream = stream::unfold((rx, channel), |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok((name, payload)) if name == channel => {
                        return Some((payload.to_vec(), (rx, channel)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "pub/sub subscriber lagged; messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
