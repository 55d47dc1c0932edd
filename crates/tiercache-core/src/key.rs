//! Cache keys and their remote representation.
//!
//! Remote tiers share one flat keyspace, so each key is qualified with its
//! region and a type tag:
//!
//! ```text
//! orders:I:42        number key 42 in region "orders"
//! orders:S:42        text key "42" in region "orders"
//! orders:O:92a3...   object key (serialized bytes, hex encoded)
//! a%3AS:S:x          text key "x" in region "a:S"
//! ```
//!
//! `%` and `:` in region names are percent-encoded, so the region part of a
//! name always ends at its first `:`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::serializer::Serializer;

const NUMBER_TAG: &str = "I";
const TEXT_TAG: &str = "S";
const OBJECT_TAG: &str = "O";

/// A cache key with stable identity across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    Number(i64),
    Text(String),
    /// Opaque application value, stored in its serialized form.
    Object(Vec<u8>),
}

impl CacheKey {
    /// Build an object key from any serializable value.
    pub fn object<T: Serialize + ?Sized>(value: &T, serializer: &Serializer) -> Result<Self> {
        Ok(Self::Object(serializer.serialize(value)?))
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Number(_) => NUMBER_TAG,
            Self::Text(_) => TEXT_TAG,
            Self::Object(_) => OBJECT_TAG,
        }
    }

    /// Qualified name of this key in a shared remote store.
    pub fn remote_name(&self, region: &str) -> String {
        format!("{}{}:{}", remote_prefix(region), self.tag(), self)
    }

    /// Recover a key from a qualified remote name, if it belongs to `region`.
    pub fn from_remote_name(region: &str, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(&remote_prefix(region))?;
        let (tag, value) = rest.split_once(':')?;
        match tag {
            NUMBER_TAG => value.parse().ok().map(Self::Number),
            TEXT_TAG => Some(Self::Text(value.to_string())),
            OBJECT_TAG => hex::decode(value).ok().map(Self::Object),
            _ => None,
        }
    }
}

/// Prefix shared by every remote name of a region (`"<escaped region>:"`).
pub fn remote_prefix(region: &str) -> String {
    let mut prefix = String::with_capacity(region.len() + 1);
    for c in region.chars() {
        match c {
            '%' => prefix.push_str("%25"),
            ':' => prefix.push_str("%3A"),
            c => prefix.push(c),
        }
    }
    prefix.push(':');
    prefix
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Object(bytes) => f.write_str(&hex::encode(bytes)),
        }
    }
}

impl From<i64> for CacheKey {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for CacheKey {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for CacheKey {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for CacheKey {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

/// Keys carried by a delete-key command: one key or a key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPayload {
    One(CacheKey),
    Many(Vec<CacheKey>),
}

impl KeyPayload {
    pub fn keys(&self) -> &[CacheKey] {
        match self {
            Self::One(key) => std::slice::from_ref(key),
            Self::Many(keys) => keys,
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

impl From<CacheKey> for KeyPayload {
    fn from(key: CacheKey) -> Self {
        Self::One(key)
    }
}

impl From<Vec<CacheKey>> for KeyPayload {
    fn from(keys: Vec<CacheKey>) -> Self {
        Self::Many(keys)
    }
}
