//! The advisory lock provider contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::lock::{AdvisoryLock, LockProps, ProviderLock};

/// Backing store for advisory locks.
///
/// Implementations must make [`acquire`] atomic across the whole key set:
/// either every key is taken in one step or none is, with no window in which
/// a concurrent caller can observe a partial acquisition. Leases expire on
/// their own at the provider, so a crashed holder never blocks others for
/// longer than the lease duration.
///
/// [`acquire`]: AdvisoryLockProvider::acquire
#[async_trait]
pub trait AdvisoryLockProvider: Send + Sync {
    /// Attempt to take every key in `resource_keys` for `props.duration`.
    ///
    /// Returns `Ok(None)` when any key is currently held by someone else.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be reached or the
    /// request is malformed (for example an empty key set).
    async fn acquire(
        &self,
        resource_keys: &[String],
        props: &LockProps,
        context: &str,
    ) -> Result<Option<ProviderLock>>;

    /// Renew the lease of `lock` for another full duration.
    ///
    /// The provider verifies ownership of every key first; if any key is no
    /// longer held under this lock's token, nothing is extended and `Ok(None)`
    /// is returned. On success a fresh [`ProviderLock`] is issued and the old
    /// handle stops being valid.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be reached.
    async fn extend(&self, lock: &AdvisoryLock) -> Result<Option<ProviderLock>>;

    /// Release `lock`.
    ///
    /// Only keys still held under this lock's token are removed; keys that
    /// expired or were re-acquired by someone else are left alone. Releasing
    /// an already-released lock is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be reached.
    async fn release(&self, lock: &AdvisoryLock) -> Result<()>;
}
