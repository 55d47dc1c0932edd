use thiserror::Error;

/// Errors raised while encoding or decoding an invalidation command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command buffer truncated: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("Region name is {0} bytes, the wire format allows at most 65535")]
    RegionTooLong(usize),

    #[error("Region name is empty or not valid UTF-8")]
    InvalidRegion,

    #[error("Unknown command operator: {0:#04x}")]
    UnknownOperator(u8),

    #[error("Delete command carries no key payload")]
    MissingKey,

    #[error("Key payload error: {0}")]
    Key(String),
}

/// Core error types for tiered cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error in region '{region}': {message}")]
    Backend { region: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Cache has been closed")]
    Closed,
}

impl CacheError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new Backend error for a region
    pub fn backend(region: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            region: region.into(),
            message: message.into(),
        }
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Broker error
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    /// Errors that are expected to clear up on their own (network, timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Broker(_) | Self::Timeout(_)
        )
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Backend { .. } | Self::Timeout(_) | Self::Closed => ErrorCategory::Backend,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Command(_) => ErrorCategory::Protocol,
            Self::Broker(_) => ErrorCategory::Broker,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Backend,
    Serialization,
    Protocol,
    Broker,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Backend => write!(f, "backend"),
            Self::Serialization => write!(f, "serialization"),
            Self::Protocol => write!(f, "protocol"),
            Self::Broker => write!(f, "broker"),
        }
    }
}

/// Convenience result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
