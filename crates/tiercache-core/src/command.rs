//! Invalidation command wire format.
//!
//! ```text
//! ┌──────────┬────┬────────────┬──────────┬───────────┬───────────┐
//! │ source   │ op │ region len │ region   │ key len   │ key bytes │
//! │ i32 LE   │ u8 │ u16 LE     │ UTF-8    │ u32 LE    │ payload   │
//! └──────────┴────┴────────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! The key payload is a [`KeyPayload`] encoded with the configured
//! [`Serializer`]. Clear commands carry a zero key length and no key bytes;
//! a clear buffer that stops right after the region is accepted as well.

use crate::error::CommandError;
use crate::key::KeyPayload;
use crate::serializer::Serializer;

/// Pub/sub channel shared by every participating process.
pub const INVALIDATION_CHANNEL: &str = "tiercache:invalidate";

const SOURCE_LEN: usize = 4;
const OPERATOR_LEN: usize = 1;
const REGION_LEN_LEN: usize = 2;
const KEY_LEN_LEN: usize = 4;
const HEADER_LEN: usize = SOURCE_LEN + OPERATOR_LEN + REGION_LEN_LEN;

/// Identifies the process that published a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(i32);

impl SourceId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Random id, generated once per cache instance.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operator {
    DeleteKey = 0x01,
    ClearRegion = 0x02,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteKey => "delete_key",
            Self::ClearRegion => "clear_region",
        }
    }
}

impl TryFrom<u8> for Operator {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::DeleteKey),
            0x02 => Ok(Self::ClearRegion),
            other => Err(CommandError::UnknownOperator(other)),
        }
    }
}

/// An invalidation message exchanged between processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub source: SourceId,
    pub operator: Operator,
    pub region: String,
    /// Always `Some` for delete commands, always `None` for clear commands.
    pub keys: Option<KeyPayload>,
}

impl Command {
    pub fn delete(source: SourceId, region: impl Into<String>, keys: impl Into<KeyPayload>) -> Self {
        Self {
            source,
            operator: Operator::DeleteKey,
            region: region.into(),
            keys: Some(keys.into()),
        }
    }

    pub fn clear(source: SourceId, region: impl Into<String>) -> Self {
        Self {
            source,
            operator: Operator::ClearRegion,
            region: region.into(),
            keys: None,
        }
    }

    /// Whether this command was published by `source`.
    pub fn is_from(&self, source: SourceId) -> bool {
        self.source == source
    }

    pub fn encode(&self, serializer: &Serializer) -> Result<Vec<u8>, CommandError> {
        let region = self.region.as_bytes();
        if region.is_empty() {
            return Err(CommandError::InvalidRegion);
        }
        let region_len =
            u16::try_from(region.len()).map_err(|_| CommandError::RegionTooLong(region.len()))?;

        let key_bytes = match (&self.operator, &self.keys) {
            (Operator::DeleteKey, Some(keys)) => serializer
                .serialize(keys)
                .map_err(|e| CommandError::Key(e.to_string()))?,
            (Operator::DeleteKey, None) => return Err(CommandError::MissingKey),
            (Operator::ClearRegion, _) => Vec::new(),
        };
        let key_len = u32::try_from(key_bytes.len())
            .map_err(|_| CommandError::Key(format!("payload of {} bytes", key_bytes.len())))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + region.len() + KEY_LEN_LEN + key_bytes.len());
        buf.extend_from_slice(&self.source.get().to_le_bytes());
        buf.push(self.operator as u8);
        buf.extend_from_slice(&region_len.to_le_bytes());
        buf.extend_from_slice(region);
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&key_bytes);
        Ok(buf)
    }

    pub fn decode(buf: &[u8], serializer: &Serializer) -> Result<Self, CommandError> {
        let mut reader = Reader::new(buf);

        let source = SourceId(i32::from_le_bytes(reader.array()?));
        let [op] = reader.array::<OPERATOR_LEN>()?;
        let operator = Operator::try_from(op)?;

        let region_len = u16::from_le_bytes(reader.array()?) as usize;
        let region = std::str::from_utf8(reader.take(region_len)?)
            .map_err(|_| CommandError::InvalidRegion)?;
        if region.is_empty() {
            return Err(CommandError::InvalidRegion);
        }

        let key_bytes = if reader.is_empty() {
            &[][..]
        } else {
            let key_len = u32::from_le_bytes(reader.array()?) as usize;
            if key_len > 0 {
                reader.take(key_len)?
            } else {
                &[][..]
            }
        };

        let keys = match operator {
            Operator::DeleteKey if key_bytes.is_empty() => return Err(CommandError::MissingKey),
            Operator::DeleteKey => Some(
                serializer
                    .deserialize::<KeyPayload>(key_bytes)
                    .map_err(|e| CommandError::Key(e.to_string()))?,
            ),
            Operator::ClearRegion => None,
        };

        Ok(Self {
            source,
            operator,
            region: region.to_string(),
            keys,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CommandError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CommandError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.buf.len(),
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CommandError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
