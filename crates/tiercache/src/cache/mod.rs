//! Two-tier caching with pub/sub invalidation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ TieredCache (get / get_or_load / put / evict / clear)    │
//! └───────────────┬─────────────────────────────┬────────────┘
//!                 │                             │
//! ┌───────────────▼──────────────┐ ┌────────────▼────────────┐
//! │ TierManager                  │ │ InvalidationChannel     │
//! │  L1 registry  (moka / null)  │◄┤  subscriber task        │
//! │  L2 registry  (redis/memory) │ │  expiration worker      │
//! └──────────────────────────────┘ └────────────┬────────────┘
//!                                               │
//!                                  ┌────────────▼────────────┐
//!                                  │ PubSubTransport         │
//!                                  │  redis / memory         │
//!                                  └─────────────────────────┘
//! ```
//!
//! Peer invalidations only touch L1: the writer already updated L2.

pub mod backend;
pub mod channel;
pub mod expiration;
pub mod manager;
pub mod pubsub;
pub mod registry;
pub mod tiered;

pub use backend::{
    CacheBackend, CacheProvider, CachedBytes, ExpirationListener, LocalBackend, MemoryStore,
    RedisProvider, RemoteBackend,
};
pub use channel::{ChannelState, InvalidationChannel, MessageOutcome};
pub use expiration::{ExpirationQueue, ExpirationReceiver, ExpiredEntry};
pub use manager::TierManager;
pub use pubsub::{MemoryPubSub, MessageStream, PubSubTransport, RedisPubSub};
pub use registry::ProviderRegistry;
pub use tiered::{TieredCache, TieredCacheBuilder};
