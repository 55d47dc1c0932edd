use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tiercache_core::{
    CacheElement, CacheKey, KeyPayload, Result, Serializer, SourceId, Tier,
};

use super::backend::{CachedBytes, RemoteBackend};
use super::channel::{ChannelState, InvalidationChannel};
use super::expiration::ExpirationQueue;
use super::manager::TierManager;
use super::pubsub::{MemoryPubSub, PubSubTransport};
use crate::config::CacheConfig;
use crate::metrics;

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Two-tier cache with cross-process invalidation.
///
/// ## Lookup Order
///
/// 1. L1 (local, per process)
/// 2. L2 (remote, shared); a hit is copied into L1
/// 3. Optional loader; a loaded value is written to both tiers
///
/// ## Writes
///
/// Every write or delete first tells peers to drop their L1 copy, then
/// updates L1 and L2. Peers refill from L2 on their next read.
pub struct TieredCache {
    tiers: Arc<TierManager>,
    channel: Arc<InvalidationChannel>,
    serializer: Serializer,
    closed: AtomicBool,
}

impl TieredCache {
    pub fn builder(config: CacheConfig) -> TieredCacheBuilder {
        TieredCacheBuilder::new(config)
    }

    fn inactive(&self, region: &str) -> bool {
        region.is_empty() || self.closed.load(Ordering::Acquire)
    }

    /// Read a value, trying L1 then L2.
    pub async fn get<V: DeserializeOwned>(
        &self,
        region: &str,
        key: impl Into<CacheKey>,
    ) -> CacheElement<V> {
        let key = key.into();
        if self.inactive(region) {
            return CacheElement::empty(region, key);
        }

        if let Some(bytes) = self.tiers.get(Tier::Local, region, &key).await
            && let Some(value) = self.decode::<V>(Tier::Local, region, &key, &bytes).await
        {
            tracing::debug!(region = %region, key = %key, "cache hit (L1)");
            metrics::record_cache_hit(Tier::Local);
            return CacheElement::found(region, key, value, Tier::Local);
        }

        if let Some(bytes) = self.tiers.get(Tier::Remote, region, &key).await
            && let Some(value) = self.decode::<V>(Tier::Remote, region, &key, &bytes).await
        {
            tracing::debug!(region = %region, key = %key, "cache hit (L2)");
            metrics::record_cache_hit(Tier::Remote);
            self.tiers.set(Tier::Local, region, &key, bytes).await;
            return CacheElement::found(region, key, value, Tier::Remote);
        }

        tracing::debug!(region = %region, key = %key, "cache miss");
        metrics::record_cache_miss();
        CacheElement::empty(region, key)
    }

    /// Read a value, invoking `loader` on a miss.
    ///
    /// `Ok(Some(v))` is stored in both tiers and returned. `Ok(None)` stores
    /// nothing. A loader error is logged and reported as a miss.
    pub async fn get_or_load<V, F, Fut, E>(
        &self,
        region: &str,
        key: impl Into<CacheKey>,
        loader: F,
    ) -> CacheElement<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Display,
    {
        let key = key.into();
        let element = self.get::<V>(region, key.clone()).await;
        if element.is_hit() || self.inactive(region) {
            return element;
        }

        match loader().await {
            Ok(Some(value)) => {
                metrics::record_cache_load(true);
                if !self.store(region, &key, &value).await {
                    return element;
                }
                CacheElement {
                    region: region.to_string(),
                    key,
                    value: Some(value),
                    tier: None,
                }
            }
            Ok(None) => {
                metrics::record_cache_load(false);
                element
            }
            Err(e) => {
                tracing::warn!(region = %region, key = %key, error = %e, "cache loader failed");
                element
            }
        }
    }

    /// Store a value in both tiers after invalidating peers.
    ///
    /// A value that serializes to nil (`None`, `()`) is evicted instead.
    pub async fn put<V: Serialize + ?Sized>(
        &self,
        region: &str,
        key: impl Into<CacheKey>,
        value: &V,
    ) {
        let key = key.into();
        if self.inactive(region) {
            return;
        }
        self.store(region, &key, value).await;
    }

    /// Like [`Self::put`], with `None` meaning evict.
    pub async fn put_option<V: Serialize + ?Sized>(
        &self,
        region: &str,
        key: impl Into<CacheKey>,
        value: Option<&V>,
    ) {
        match value {
            Some(value) => self.put(region, key, value).await,
            None => self.evict(region, key).await,
        }
    }

    /// Returns `false` when the value was nil and got evicted instead.
    async fn store<V: Serialize + ?Sized>(
        &self,
        region: &str,
        key: &CacheKey,
        value: &V,
    ) -> bool {
        let bytes: CachedBytes = match self.serializer.serialize(value) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                tracing::warn!(region = %region, key = %key, error = %e, "failed to serialize cache value");
                return true;
            }
        };
        if self.serializer.is_nil(&bytes) {
            tracing::trace!(region = %region, key = %key, "nil value, evicting");
            self.evict(region, key.clone()).await;
            return false;
        }

        self.channel.publish_evict(region, key.clone()).await;
        self.tiers.set(Tier::Local, region, key, Arc::clone(&bytes)).await;
        self.tiers.set(Tier::Remote, region, key, bytes).await;
        true
    }

    /// Remove a key from both tiers and from every peer's L1.
    pub async fn evict(&self, region: &str, key: impl Into<CacheKey>) {
        let key = key.into();
        if self.inactive(region) {
            return;
        }
        self.tiers.evict(Tier::Local, region, &key).await;
        self.tiers.evict(Tier::Remote, region, &key).await;
        self.channel.publish_evict(region, key).await;
    }

    /// Remove several keys with a single broadcast.
    pub async fn batch_evict<K, I>(&self, region: &str, keys: I)
    where
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<CacheKey> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() || self.inactive(region) {
            return;
        }
        self.tiers.batch_evict(Tier::Local, region, &keys).await;
        self.tiers.batch_evict(Tier::Remote, region, &keys).await;
        self.channel
            .publish_evict(region, KeyPayload::Many(keys))
            .await;
    }

    /// Empty a region in both tiers and on every peer.
    ///
    /// Peers are notified even if a tier fails; the first failure is returned.
    pub async fn clear(&self, region: &str) -> Result<()> {
        if self.inactive(region) {
            return Ok(());
        }
        let local = self.tiers.clear(Tier::Local, region).await;
        let remote = self.tiers.clear(Tier::Remote, region).await;
        self.channel.publish_clear(region).await;

        if let Err(e) = &remote {
            tracing::warn!(region = %region, error = %e, category = %e.category(), "failed to clear remote region");
        }
        local.and(remote)
    }

    /// Keys held in this process's L1 for `region`.
    pub async fn keys(&self, region: &str) -> Vec<CacheKey> {
        if self.inactive(region) {
            return Vec::new();
        }
        self.tiers
            .keys(Tier::Local, region)
            .await
            .unwrap_or_default()
    }

    /// Keys held in L2 for `region`, if the remote engine can enumerate.
    pub async fn remote_keys(&self, region: &str) -> Option<Vec<CacheKey>> {
        if self.inactive(region) {
            return Some(Vec::new());
        }
        self.tiers.keys(Tier::Remote, region).await
    }

    /// Stop the invalidation workers and close both tiers. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channel.close().await;
        self.tiers.close().await;
        tracing::info!(source = %self.channel.source(), "tiered cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn source_id(&self) -> SourceId {
        self.channel.source()
    }

    pub fn subscription_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Wait until peers' invalidations are being received.
    pub async fn wait_subscribed(&self, timeout: Duration) -> bool {
        self.channel.wait_subscribed(timeout).await
    }

    pub fn tiers(&self) -> &Arc<TierManager> {
        &self.tiers
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    /// Deserialize a stored value. Undecodable entries are evicted from their tier.
    async fn decode<V: DeserializeOwned>(
        &self,
        tier: Tier,
        region: &str,
        key: &CacheKey,
        bytes: &[u8],
    ) -> Option<V> {
        match self.serializer.deserialize(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    region = %region,
                    key = %key,
                    tier = %tier,
                    error = %e,
                    "failed to deserialize cached value; evicting"
                );
                self.tiers.evict(tier, region, key).await;
                None
            }
        }
    }
}

/// Assembles a [`TieredCache`] and starts its invalidation workers.
///
/// Must be built inside a tokio runtime.
pub struct TieredCacheBuilder {
    config: CacheConfig,
    remote: RemoteBackend,
    transport: Option<Arc<dyn PubSubTransport>>,
    source: Option<SourceId>,
    publish_timeout: Duration,
}

impl TieredCacheBuilder {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            remote: RemoteBackend::Memory(Default::default()),
            transport: None,
            source: None,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn remote(mut self, remote: RemoteBackend) -> Self {
        self.remote = remote;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn PubSubTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Fix the source id instead of drawing a random one.
    pub fn source_id(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TieredCache> {
        self.config.validate()?;

        let source = self.source.unwrap_or_else(SourceId::random);
        let serializer = Serializer::new(self.config.serializer);
        let (queue, expirations) = ExpirationQueue::channel();

        let local = self.config.local.provider(&self.config, Arc::new(queue));
        let remote_kind = self.remote.kind();
        let remote = self.remote.provider();
        let tiers = Arc::new(TierManager::new(local, remote));

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(MemoryPubSub::new()));
        let channel = InvalidationChannel::new(
            source,
            serializer.clone(),
            Arc::clone(&tiers),
            transport,
            self.publish_timeout,
        );
        channel.start(expirations);

        tracing::info!(
            source = %source,
            local = tiers.registry(Tier::Local).provider_name(),
            remote = remote_kind,
            serializer = %serializer.kind(),
            "tiered cache started"
        );

        Ok(TieredCache {
            tiers,
            channel,
            serializer,
            closed: AtomicBool::new(false),
        })
    }
}
