//! Hand-off of local expirations to the invalidation channel.
//!
//! The local engine reports evictions from its housekeeping, which must not
//! block or await. [`ExpirationQueue`] only enqueues; the channel's worker
//! drains the queue in batches.

use std::collections::BTreeMap;
use tiercache_core::CacheKey;
use tokio::sync::mpsc;

use super::backend::ExpirationListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredEntry {
    pub region: String,
    pub key: CacheKey,
}

/// Sending half, installed as the local tier's [`ExpirationListener`].
#[derive(Clone)]
pub struct ExpirationQueue {
    tx: mpsc::UnboundedSender<ExpiredEntry>,
}

pub struct ExpirationReceiver {
    rx: mpsc::UnboundedReceiver<ExpiredEntry>,
}

impl ExpirationQueue {
    pub fn channel() -> (Self, ExpirationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ExpirationReceiver { rx })
    }
}

impl ExpirationListener for ExpirationQueue {
    fn on_expired(&self, region: &str, key: CacheKey) {
        let entry = ExpiredEntry {
            region: region.to_string(),
            key,
        };
        if self.tx.send(entry).is_err() {
            tracing::trace!(region = %region, "expiration worker stopped; dropping expired key");
        }
    }
}

impl ExpirationReceiver {
    /// Wait for at least one entry, then take whatever else is queued, up to
    /// `max` entries, grouped by region. `None` once every sender is gone.
    pub async fn next_batch(&mut self, max: usize) -> Option<BTreeMap<String, Vec<CacheKey>>> {
        let first = self.rx.recv().await?;
        let mut batch: BTreeMap<String, Vec<CacheKey>> = BTreeMap::new();
        batch.entry(first.region).or_default().push(first.key);

        let mut taken = 1;
        while taken < max {
            match self.rx.try_recv() {
                Ok(entry) => {
                    batch.entry(entry.region).or_default().push(entry.key);
                    taken += 1;
                }
                Err(_) => break,
            }
        }
        Some(batch)
    }
}
