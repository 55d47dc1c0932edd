//! Cross-process invalidation channel.
//!
//! Owns two background tasks:
//!
//! - the subscriber, which keeps a subscription to [`INVALIDATION_CHANNEL`]
//!   and applies peer commands to the local tier only;
//! - the expiration worker, which drains the [`ExpirationReceiver`], evicts
//!   expired keys from the remote tier and tells peers to drop them.
//!
//! Commands published by this instance come back through the broker and are
//! ignored by source id.

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::{
    CacheError, CacheKey, Command, CommandError, INVALIDATION_CHANNEL, KeyPayload, Operator,
    Result, Serializer, SourceId, Tier,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::expiration::ExpirationReceiver;
use super::manager::TierManager;
use super::pubsub::PubSubTransport;
use crate::metrics::{self, DropReason};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const EXPIRATION_BATCH: usize = 256;

/// Subscription state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Subscribing,
    Subscribed,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Applied(Operator),
    SelfOriginated,
    Dropped,
}

pub struct InvalidationChannel {
    source: SourceId,
    serializer: Serializer,
    tiers: Arc<TierManager>,
    transport: Arc<dyn PubSubTransport>,
    publish_timeout: Duration,
    state: watch::Sender<ChannelState>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl InvalidationChannel {
    pub fn new(
        source: SourceId,
        serializer: Serializer,
        tiers: Arc<TierManager>,
        transport: Arc<dyn PubSubTransport>,
        publish_timeout: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Arc::new(Self {
            source,
            serializer,
            tiers,
            transport,
            publish_timeout,
            state,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Spawn the subscriber and the expiration worker.
    pub fn start(self: &Arc<Self>, expirations: ExpirationReceiver) {
        let subscriber = tokio::spawn(Arc::clone(self).run_subscriber());
        let expirer = tokio::spawn(Arc::clone(self).run_expirations(expirations));
        self.workers.lock().extend([subscriber, expirer]);
        tracing::debug!(
            source = %self.source,
            transport = self.transport.name(),
            "invalidation channel started"
        );
    }

    /// Wait until the subscription is active. Returns `false` on timeout.
    pub async fn wait_subscribed(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|s| *s == ChannelState::Subscribed)).await
        {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    async fn run_subscriber(self: Arc<Self>) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.listen(&mut backoff) => result,
            };
            self.state.send_replace(ChannelState::Disconnected);

            match result {
                Err(e) if e.is_transient() => tracing::warn!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Cache invalidation subscriber disconnected, reconnecting..."
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    category = %e.category(),
                    backoff_secs = backoff.as_secs(),
                    "Cache invalidation subscriber error, reconnecting..."
                ),
                Ok(()) => {}
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        self.state.send_replace(ChannelState::Disconnected);
        tracing::debug!(source = %self.source, "invalidation subscriber stopped");
    }

    /// Subscribe and apply messages until the stream ends.
    async fn listen(&self, backoff: &mut Duration) -> Result<()> {
        self.state.send_replace(ChannelState::Subscribing);
        let mut stream = self.transport.subscribe(INVALIDATION_CHANNEL).await?;
        self.state.send_replace(ChannelState::Subscribed);
        *backoff = INITIAL_BACKOFF;

        tracing::info!(
            channel = INVALIDATION_CHANNEL,
            source = %self.source,
            transport = self.transport.name(),
            "Subscribed to invalidation channel"
        );

        while let Some(payload) = stream.next().await {
            self.handle_message(&payload).await;
        }
        Err(CacheError::broker("pub/sub connection closed"))
    }

    /// Decode and apply one inbound message to the local tier.
    pub async fn handle_message(&self, payload: &[u8]) -> MessageOutcome {
        if payload.is_empty() {
            tracing::warn!("received empty invalidation message");
            metrics::record_invalidation_dropped(DropReason::Empty);
            return MessageOutcome::Dropped;
        }

        let command = match Command::decode(payload, &self.serializer) {
            Ok(command) => command,
            Err(CommandError::UnknownOperator(op)) => {
                tracing::warn!(operator = op, "unknown invalidation operator");
                metrics::record_invalidation_dropped(DropReason::Malformed);
                return MessageOutcome::Dropped;
            }
            Err(e) => {
                tracing::warn!(error = %e, len = payload.len(), "failed to decode invalidation message");
                metrics::record_invalidation_dropped(DropReason::Malformed);
                return MessageOutcome::Dropped;
            }
        };

        if command.is_from(self.source) {
            tracing::trace!(region = %command.region, "ignoring own invalidation");
            metrics::record_invalidation_dropped(DropReason::SelfOriginated);
            return MessageOutcome::SelfOriginated;
        }

        metrics::record_invalidation_received(command.operator);
        match (command.operator, command.keys) {
            (Operator::DeleteKey, Some(KeyPayload::One(key))) => {
                tracing::debug!(region = %command.region, key = %key, source = %command.source, "received cache invalidation");
                self.tiers.evict(Tier::Local, &command.region, &key).await;
            }
            (Operator::DeleteKey, Some(KeyPayload::Many(keys))) => {
                tracing::debug!(region = %command.region, count = keys.len(), source = %command.source, "received batch invalidation");
                self.tiers
                    .batch_evict(Tier::Local, &command.region, &keys)
                    .await;
            }
            (Operator::DeleteKey, None) => {
                metrics::record_invalidation_dropped(DropReason::Malformed);
                return MessageOutcome::Dropped;
            }
            (Operator::ClearRegion, _) => {
                tracing::debug!(region = %command.region, source = %command.source, "received region clear");
                if let Err(e) = self.tiers.clear(Tier::Local, &command.region).await {
                    tracing::warn!(region = %command.region, error = %e, "failed to clear local region");
                }
            }
        }
        MessageOutcome::Applied(command.operator)
    }

    /// Broadcast a command to peers. Failures are logged, never returned.
    pub async fn publish(&self, command: &Command) {
        if self.shutdown.is_cancelled() {
            tracing::debug!(region = %command.region, "channel closed; invalidation not published");
            return;
        }

        let payload = match command.encode(&self.serializer) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(region = %command.region, error = %e, "failed to encode invalidation");
                metrics::record_publish_failure();
                return;
            }
        };

        let sent = tokio::time::timeout(
            self.publish_timeout,
            self.transport.publish(INVALIDATION_CHANNEL, payload),
        )
        .await
        .unwrap_or_else(|_| Err(CacheError::Timeout(self.publish_timeout.as_millis() as u64)));

        match sent {
            Ok(()) => {
                metrics::record_invalidation_published(command.operator);
                tracing::debug!(
                    region = %command.region,
                    operator = command.operator.as_str(),
                    "published cache invalidation"
                );
            }
            Err(e) => {
                metrics::record_publish_failure();
                tracing::warn!(
                    region = %command.region,
                    operator = command.operator.as_str(),
                    error = %e,
                    "failed to publish invalidation"
                );
            }
        }
    }

    pub async fn publish_evict(&self, region: &str, keys: impl Into<KeyPayload>) {
        self.publish(&Command::delete(self.source, region, keys)).await;
    }

    pub async fn publish_clear(&self, region: &str) {
        self.publish(&Command::clear(self.source, region)).await;
    }

    async fn run_expirations(self: Arc<Self>, mut expirations: ExpirationReceiver) {
        loop {
            let batch = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = expirations.next_batch(EXPIRATION_BATCH) => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            for (region, keys) in batch {
                self.propagate_expired(&region, keys).await;
            }
        }
        tracing::debug!(source = %self.source, "expiration worker stopped");
    }

    /// Evict locally expired keys from the remote tier and notify peers.
    ///
    /// Keys written again since they expired are skipped: moka reports a
    /// stale entry replaced by a fresh write as expired.
    pub async fn propagate_expired(&self, region: &str, mut candidates: Vec<CacheKey>) {
        candidates.sort();
        candidates.dedup();

        let mut keys = Vec::with_capacity(candidates.len());
        for key in candidates {
            if self.tiers.get(Tier::Local, region, &key).await.is_some() {
                tracing::trace!(region = %region, key = %key, "expired key is live again");
                continue;
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return;
        }
        metrics::record_local_expirations(keys.len());
        tracing::debug!(region = %region, count = keys.len(), "propagating local expirations");

        self.tiers.batch_evict(Tier::Remote, region, &keys).await;
        let payload = match <[CacheKey; 1]>::try_from(keys) {
            Ok([key]) => KeyPayload::One(key),
            Err(keys) => KeyPayload::Many(keys),
        };
        self.publish_evict(region, payload).await;
    }

    /// Stop both workers and wait for them. Safe to call more than once.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "invalidation worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{CachedBytes, MemoryProvider, MemoryStore};
    use crate::cache::expiration::ExpirationQueue;
    use crate::cache::pubsub::{MemoryPubSub, MessageStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tiercache_core::SerializerKind;

    struct Fixture {
        channel: Arc<InvalidationChannel>,
        tiers: Arc<TierManager>,
        hub: MemoryPubSub,
    }

    fn fixture() -> Fixture {
        let tiers = Arc::new(TierManager::new(
            Arc::new(MemoryProvider::new(MemoryStore::new())),
            Arc::new(MemoryProvider::new(MemoryStore::new())),
        ));
        let hub = MemoryPubSub::new();
        let channel = InvalidationChannel::new(
            SourceId::new(1),
            serializer(),
            Arc::clone(&tiers),
            Arc::new(hub.clone()),
            Duration::from_secs(1),
        );
        Fixture { channel, tiers, hub }
    }

    fn serializer() -> Serializer {
        Serializer::new(SerializerKind::Msgpack)
    }

    fn bytes(s: &str) -> CachedBytes {
        Arc::new(s.as_bytes().to_vec())
    }

    async fn seed(tiers: &TierManager, region: &str, key: CacheKey) {
        tiers.set(Tier::Local, region, &key, bytes("l1")).await;
        tiers.set(Tier::Remote, region, &key, bytes("l2")).await;
    }

    #[tokio::test]
    async fn test_peer_delete_evicts_local_only() {
        let f = fixture();
        seed(&f.tiers, "orders", CacheKey::from(1)).await;

        let cmd = Command::delete(SourceId::new(2), "orders", CacheKey::from(1));
        let outcome = f
            .channel
            .handle_message(&cmd.encode(&serializer()).unwrap())
            .await;

        assert_eq!(outcome, MessageOutcome::Applied(Operator::DeleteKey));
        assert_eq!(f.tiers.get(Tier::Local, "orders", &CacheKey::from(1)).await, None);
        assert_eq!(
            f.tiers.get(Tier::Remote, "orders", &CacheKey::from(1)).await,
            Some(bytes("l2"))
        );
    }

    #[tokio::test]
    async fn test_own_message_is_ignored() {
        let f = fixture();
        seed(&f.tiers, "orders", CacheKey::from(1)).await;

        let cmd = Command::delete(f.channel.source(), "orders", CacheKey::from(1));
        let outcome = f
            .channel
            .handle_message(&cmd.encode(&serializer()).unwrap())
            .await;

        assert_eq!(outcome, MessageOutcome::SelfOriginated);
        assert!(f.tiers.get(Tier::Local, "orders", &CacheKey::from(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_peer_batch_and_clear() {
        let f = fixture();
        for i in 1..=3 {
            seed(&f.tiers, "orders", CacheKey::from(i)).await;
        }
        seed(&f.tiers, "users", CacheKey::from(1)).await;

        let batch = Command::delete(
            SourceId::new(2),
            "orders",
            vec![CacheKey::from(1), CacheKey::from(2)],
        );
        f.channel
            .handle_message(&batch.encode(&serializer()).unwrap())
            .await;
        assert_eq!(
            f.tiers.keys(Tier::Local, "orders").await,
            Some(vec![CacheKey::from(3)])
        );

        let clear = Command::clear(SourceId::new(2), "orders");
        let outcome = f
            .channel
            .handle_message(&clear.encode(&serializer()).unwrap())
            .await;
        assert_eq!(outcome, MessageOutcome::Applied(Operator::ClearRegion));
        assert_eq!(f.tiers.keys(Tier::Local, "orders").await, Some(vec![]));
        assert_eq!(f.tiers.keys(Tier::Remote, "orders").await.unwrap().len(), 3);
        assert_eq!(f.tiers.keys(Tier::Local, "users").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_messages_are_dropped() {
        let f = fixture();
        assert_eq!(f.channel.handle_message(&[]).await, MessageOutcome::Dropped);
        assert_eq!(
            f.channel.handle_message(&[1, 2, 3]).await,
            MessageOutcome::Dropped
        );

        let mut unknown = Command::clear(SourceId::new(2), "orders")
            .encode(&serializer())
            .unwrap();
        unknown[4] = 0x7f;
        assert_eq!(
            f.channel.handle_message(&unknown).await,
            MessageOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn test_expired_keys_are_evicted_remotely_and_broadcast() {
        let f = fixture();
        let mut sub = f.hub.subscribe(INVALIDATION_CHANNEL).await.unwrap();
        for i in 1..=2 {
            f.tiers
                .set(Tier::Remote, "orders", &CacheKey::from(i), bytes("l2"))
                .await;
        }

        f.channel
            .propagate_expired("orders", vec![CacheKey::from(2), CacheKey::from(1), CacheKey::from(2)])
            .await;

        assert_eq!(f.tiers.keys(Tier::Remote, "orders").await, Some(vec![]));
        let payload = sub.next().await.unwrap();
        let cmd = Command::decode(&payload, &serializer()).unwrap();
        assert_eq!(cmd.source, f.channel.source());
        assert_eq!(
            cmd.keys,
            Some(KeyPayload::Many(vec![CacheKey::from(1), CacheKey::from(2)]))
        );
    }

    #[tokio::test]
    async fn test_rewritten_key_is_not_propagated() {
        let f = fixture();
        let mut sub = f.hub.subscribe(INVALIDATION_CHANNEL).await.unwrap();
        // Key 1 was written again after expiring; key 2 is really gone
        seed(&f.tiers, "orders", CacheKey::from(1)).await;
        f.tiers
            .set(Tier::Remote, "orders", &CacheKey::from(2), bytes("l2"))
            .await;

        f.channel
            .propagate_expired("orders", vec![CacheKey::from(1), CacheKey::from(2)])
            .await;

        assert_eq!(
            f.tiers.get(Tier::Remote, "orders", &CacheKey::from(1)).await,
            Some(bytes("l2"))
        );
        assert_eq!(f.tiers.get(Tier::Remote, "orders", &CacheKey::from(2)).await, None);
        let cmd = Command::decode(&sub.next().await.unwrap(), &serializer()).unwrap();
        assert_eq!(cmd.keys, Some(KeyPayload::One(CacheKey::from(2))));
    }

    #[tokio::test]
    async fn test_all_keys_live_again_sends_nothing() {
        let f = fixture();
        let mut sub = f.hub.subscribe(INVALIDATION_CHANNEL).await.unwrap();
        seed(&f.tiers, "orders", CacheKey::from(1)).await;

        f.channel
            .propagate_expired("orders", vec![CacheKey::from(1)])
            .await;

        assert!(f.tiers.get(Tier::Remote, "orders", &CacheKey::from(1)).await.is_some());
        let next = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_single_expired_key_is_sent_as_one() {
        let f = fixture();
        let mut sub = f.hub.subscribe(INVALIDATION_CHANNEL).await.unwrap();

        f.channel
            .propagate_expired("orders", vec![CacheKey::from("k")])
            .await;

        let cmd = Command::decode(&sub.next().await.unwrap(), &serializer()).unwrap();
        assert_eq!(cmd.keys, Some(KeyPayload::One(CacheKey::from("k"))));
    }

    #[tokio::test]
    async fn test_oversized_region_is_not_published() {
        let f = fixture();
        let region = "r".repeat(u16::MAX as usize + 1);
        f.channel.publish_clear(&region).await;
        f.channel.publish_clear("orders").await;

        let mut sub = f.hub.subscribe(INVALIDATION_CHANNEL).await.unwrap();
        f.channel.publish_clear("users").await;
        let cmd = Command::decode(&sub.next().await.unwrap(), &serializer()).unwrap();
        assert_eq!(cmd.region, "users");
    }

    #[tokio::test]
    async fn test_start_subscribes_and_close_stops_workers() {
        let f = fixture();
        let (queue, expirations) = ExpirationQueue::channel();
        f.channel.start(expirations);

        assert!(f.channel.wait_subscribed(Duration::from_secs(2)).await);
        assert_eq!(f.channel.state(), ChannelState::Subscribed);

        seed(&f.tiers, "orders", CacheKey::from(1)).await;
        let peer = Command::delete(SourceId::new(2), "orders", CacheKey::from(1));
        f.hub
            .publish(INVALIDATION_CHANNEL, peer.encode(&serializer()).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.tiers.get(Tier::Local, "orders", &CacheKey::from(1)).await, None);

        f.channel.close().await;
        f.channel.close().await;
        assert_eq!(f.channel.state(), ChannelState::Disconnected);
        drop(queue);
    }

    /// Fails its first subscribe with the given error, then delegates to a hub.
    struct FlakyTransport {
        hub: MemoryPubSub,
        first_error: Mutex<Option<CacheError>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PubSubTransport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
            self.hub.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.first_error.lock().take() {
                return Err(e);
            }
            self.hub.subscribe(channel).await
        }
    }

    async fn reconnects_after(error: CacheError) {
        let transport = Arc::new(FlakyTransport {
            hub: MemoryPubSub::new(),
            first_error: Mutex::new(Some(error)),
            attempts: AtomicUsize::new(0),
        });
        let tiers = Arc::new(TierManager::new(
            Arc::new(MemoryProvider::new(MemoryStore::new())),
            Arc::new(MemoryProvider::new(MemoryStore::new())),
        ));
        let channel = InvalidationChannel::new(
            SourceId::new(1),
            serializer(),
            tiers,
            transport.clone(),
            Duration::from_secs(1),
        );
        let (_queue, expirations) = ExpirationQueue::channel();
        channel.start(expirations);

        assert!(channel.wait_subscribed(Duration::from_secs(3)).await);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        channel.close().await;
    }

    #[tokio::test]
    async fn test_subscriber_retries_after_transient_error() {
        let error = CacheError::broker("connection refused");
        assert!(error.is_transient());
        reconnects_after(error).await;
    }

    #[tokio::test]
    async fn test_subscriber_retries_after_permanent_error() {
        let error = CacheError::configuration("no master for sentinel");
        assert!(!error.is_transient());
        reconnects_after(error).await;
    }
}
