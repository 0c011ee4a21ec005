//! The cache tier contract.

use std::collections::HashMap;

use async_trait::async_trait;
use strata_core::error::Result;
use strata_core::{CacheEntry, CacheProps, FullKey, KeyPattern};

/// A single cache tier.
///
/// Tiers only ever see fully-qualified keys; namespacing and key composition
/// happen above them. Each tier applies its own [`CacheProps`] to every entry
/// it stores, so an entry written through a stack of tiers may carry tighter
/// horizons in one tier than in another.
#[async_trait]
pub trait CacheProvider<T>: Send + Sync {
    /// Tier name for logs, metrics and admin summaries.
    fn name(&self) -> &str;

    /// The policy this tier applies to incoming entries.
    fn props(&self) -> &CacheProps;

    /// Batched read. Keys that are missing or dead are simply absent from
    /// the result; stale entries are returned, deciding what to do with
    /// them is the caller's business.
    ///
    /// # Errors
    ///
    /// Returns an error when the tier's backing store fails.
    async fn get_values(&self, keys: &[FullKey]) -> Result<HashMap<FullKey, CacheEntry<T>>>;

    /// Batched write. `None` is a tombstone: the key is deleted from this
    /// tier. Entries are tightened to this tier's policy on the way in.
    ///
    /// # Errors
    ///
    /// Returns an error when the tier's backing store fails.
    async fn put_values(&self, entries: &[(FullKey, Option<CacheEntry<T>>)]) -> Result<()>;

    /// Delete every key matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error when the tier's backing store fails.
    async fn remove_all(&self, pattern: &KeyPattern) -> Result<()>;
}
