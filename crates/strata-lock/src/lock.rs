//! Lock handles and acquisition options.

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

/// Default lease duration for an advisory lock.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(5);

/// Default total number of acquisition attempts.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Default pause between acquisition attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Retry budget for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProps {
    /// Total attempts, including the first one. Never zero.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryProps {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Resolved acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockProps {
    /// Lease duration. Locks expire on their own; crashed holders never
    /// block others beyond this.
    pub duration: Duration,
    pub retry: RetryProps,
}

impl Default for LockProps {
    fn default() -> Self {
        Self {
            duration: DEFAULT_LOCK_DURATION,
            retry: RetryProps::default(),
        }
    }
}

/// Partial acquisition parameters merged over the defaults by [`build`].
///
/// [`build`]: LockOptions::build
#[derive(Debug, Clone, Copy, Default)]
pub struct LockOptions {
    duration: Option<Duration>,
    retry_attempts: Option<u32>,
    retry_delay: Option<Duration>,
}

impl LockOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Merge these options over the defaults. Zero attempts is normalized
    /// to one.
    #[must_use]
    pub fn build(self) -> LockProps {
        LockProps {
            duration: self.duration.unwrap_or(DEFAULT_LOCK_DURATION),
            retry: RetryProps {
                attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS).max(1),
                delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            },
        }
    }
}

/// Provider-issued proof of ownership for one acquisition.
///
/// The token is opaque to callers; only the provider that issued it gives it
/// meaning. Extending a lock issues a fresh token, so a stale handle can
/// never release a lease it no longer owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLock {
    token: Uuid,
    expires_at: OffsetDateTime,
}

impl ProviderLock {
    #[must_use]
    pub fn new(token: Uuid, expires_at: OffsetDateTime) -> Self {
        Self { token, expires_at }
    }

    #[must_use]
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Absolute end of the lease.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

/// A held advisory lock over a set of resource keys.
///
/// Normally created by [`LockService`]; the key set is sorted and deduplicated
/// on the way in, which keeps multi-key acquisition deadlock-free.
///
/// [`LockService`]: crate::service::LockService
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    resource_keys: Vec<String>,
    props: LockProps,
    provider_lock: ProviderLock,
}

impl AdvisoryLock {
    #[must_use]
    pub fn new(resource_keys: Vec<String>, props: LockProps, provider_lock: ProviderLock) -> Self {
        Self {
            resource_keys,
            props,
            provider_lock,
        }
    }

    /// The locked keys, sorted and deduplicated.
    #[must_use]
    pub fn resource_keys(&self) -> &[String] {
        &self.resource_keys
    }

    #[must_use]
    pub fn props(&self) -> &LockProps {
        &self.props
    }

    #[must_use]
    pub fn provider_lock(&self) -> &ProviderLock {
        &self.provider_lock
    }
}
