//! Lock layer errors.
//!
//! Contention is not an error: every acquisition API reports "somebody else
//! holds it" as `Ok(None)`. This type only covers real faults, such as a
//! provider losing its backing store.

use thiserror::Error;

/// Errors that can occur while talking to an advisory lock provider.
#[derive(Error, Debug)]
pub enum LockError {
    /// Invalid lock request
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The lock provider failed to execute an operation
    #[error("Lock provider error: {message}")]
    Provider { message: String },
}

impl LockError {
    /// Create a new configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new provider error
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Check if this error is a configuration error
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if this error originated in the provider
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;
