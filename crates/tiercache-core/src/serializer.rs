//! Value and key serialization.
//!
//! Both tiers store opaque bytes; this module turns application values into
//! those bytes and back. The same serializer encodes the key payload carried
//! by invalidation commands, so every process in a deployment must use the
//! same kind.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{CacheError, Result};

const MSGPACK_NIL: u8 = 0xc0;

/// Serializer selection, resolved from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// MessagePack via rmp-serde (compact, default)
    #[default]
    #[serde(alias = "messagepack", alias = "rmp")]
    Msgpack,
    /// JSON via serde_json (human readable, larger)
    Json,
}

impl std::fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Msgpack => write!(f, "msgpack"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Encodes values to bytes and decodes them back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    kind: SerializerKind,
}

impl Serializer {
    pub fn new(kind: SerializerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SerializerKind {
        self.kind
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.kind {
            // Named encoding keeps struct fields self-describing across versions.
            SerializerKind::Msgpack => rmp_serde::to_vec_named(value)
                .map_err(|e| CacheError::serialization(format!("msgpack encode: {e}"))),
            SerializerKind::Json => serde_json::to_vec(value)
                .map_err(|e| CacheError::serialization(format!("json encode: {e}"))),
        }
    }

    /// Whether `bytes` is the encoding of a unit or absent value (`None`, `()`).
    pub fn is_nil(&self, bytes: &[u8]) -> bool {
        match self.kind {
            SerializerKind::Msgpack => bytes == [MSGPACK_NIL],
            SerializerKind::Json => bytes.trim_ascii() == b"null",
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Err(CacheError::serialization("empty payload"));
        }
        match self.kind {
            SerializerKind::Msgpack => rmp_serde::from_slice(bytes)
                .map_err(|e| CacheError::serialization(format!("msgpack decode: {e}"))),
            SerializerKind::Json => serde_json::from_slice(bytes)
                .map_err(|e| CacheError::serialization(format!("json decode: {e}"))),
        }
    }
}
