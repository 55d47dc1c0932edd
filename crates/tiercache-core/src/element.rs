use crate::key::CacheKey;

/// The two cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// In-process, per instance
    Local,
    /// Shared across instances
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "L1",
            Self::Remote => "L2",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a cache read.
///
/// `tier` records where the value was found; it is `None` on a full miss and
/// for values produced by a loader.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheElement<V> {
    pub region: String,
    pub key: CacheKey,
    pub value: Option<V>,
    pub tier: Option<Tier>,
}

impl<V> CacheElement<V> {
    pub fn empty(region: impl Into<String>, key: CacheKey) -> Self {
        Self {
            region: region.into(),
            key,
            value: None,
            tier: None,
        }
    }

    pub fn found(region: impl Into<String>, key: CacheKey, value: V, tier: Tier) -> Self {
        Self {
            region: region.into(),
            key,
            value: Some(value),
            tier: Some(tier),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }
}
