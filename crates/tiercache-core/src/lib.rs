pub mod command;
pub mod element;
pub mod error;
pub mod key;
pub mod serializer;

pub use command::{Command, INVALIDATION_CHANNEL, Operator, SourceId};
pub use element::{CacheElement, Tier};
pub use error::{CacheError, CommandError, ErrorCategory, Result};
pub use key::{CacheKey, KeyPayload, remote_prefix};
pub use serializer::{Serializer, SerializerKind};
