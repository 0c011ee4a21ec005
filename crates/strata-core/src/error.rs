//! Error types shared by every cache tier and the orchestration layer.

use thiserror::Error;

/// Errors that can occur during cache operations.
///
/// Lock contention is deliberately *not* represented here: failing to win an
/// advisory lock is an expected outcome and is reported through `Option`
/// returns, never through this type.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid cache policy or wiring
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A cache tier failed to execute an operation
    #[error("Cache tier '{tier}' failed: {message}")]
    Tier { tier: String, message: String },

    /// A stored payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The caller-supplied fetch callback failed
    #[error("Fetch callback failed: {source}")]
    Fetch {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Lookup of a cache by name found nothing
    #[error("Unknown cache: {name}")]
    UnknownCache { name: String },
}

impl CacheError {
    /// Create a new configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new tier error
    #[must_use]
    pub fn tier(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tier {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Create a new serialization error
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Wrap a fetch callback failure
    #[must_use]
    pub fn fetch(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Fetch {
            source: source.into(),
        }
    }

    /// Create a new unknown cache error
    #[must_use]
    pub fn unknown_cache(name: impl Into<String>) -> Self {
        Self::UnknownCache { name: name.into() }
    }

    /// Check if this error is a configuration error
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if this error originated in a cache tier
    #[must_use]
    pub const fn is_tier(&self) -> bool {
        matches!(self, Self::Tier { .. })
    }

    /// Check if this error is an unknown cache error
    #[must_use]
    pub const fn is_unknown_cache(&self) -> bool {
        matches!(self, Self::UnknownCache { .. })
    }

    /// Check if retrying the operation could plausibly succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Tier { .. })
    }

    /// Get the category of the error
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Tier { .. } => ErrorCategory::Tier,
            Self::Serialization { .. } => ErrorCategory::Data,
            Self::Fetch { .. } => ErrorCategory::Caller,
            Self::UnknownCache { .. } => ErrorCategory::Registry,
        }
    }
}

/// Error categories for classification and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid policy or setup
    Configuration,
    /// A tier (memory, Redis, ...) misbehaved
    Tier,
    /// Payload encoding or decoding failed
    Data,
    /// The caller-supplied callback failed
    Caller,
    /// Registry lookup failed
    Registry,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Tier => write!(f, "tier"),
            Self::Data => write!(f, "data"),
            Self::Caller => write!(f, "caller"),
            Self::Registry => write!(f, "registry"),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
