//! The advisory lock facade.
//!
//! Wraps an [`AdvisoryLockProvider`] with retry handling and the three
//! cooperative usage patterns. Two rules hold everywhere:
//!
//! * contention is a value (`Ok(None)`), never an error;
//! * the `using_*` helpers degrade to computing without a lock when the
//!   provider misbehaves or retries run out, so a broken lock backend can
//!   slow callers down but never stop them. Callbacks must therefore be
//!   idempotent: under contention or a flaky provider the same computation
//!   may run in several processes at once.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::lock::{AdvisoryLock, LockOptions, LockProps};
use crate::provider::AdvisoryLockProvider;

const CONTENTION_COUNTER: &str = "strata_lock_contention_total";

/// Facade over an advisory lock provider.
#[derive(Clone)]
pub struct LockService {
    provider: Arc<dyn AdvisoryLockProvider>,
}

impl LockService {
    #[must_use]
    pub fn new(provider: Arc<dyn AdvisoryLockProvider>) -> Self {
        Self { provider }
    }

    /// Service backed by the in-process provider. Handy for tests and
    /// single-process deployments.
    #[must_use]
    pub fn in_process() -> Self {
        Self::new(Arc::new(crate::local::LocalLockProvider::new()))
    }

    /// Acquire a lock over `keys`, retrying per `options` before giving up
    /// with `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates provider faults. Contention is `Ok(None)`.
    pub async fn acquire_lock(
        &self,
        keys: &[String],
        context: &str,
        options: LockOptions,
    ) -> Result<Option<AdvisoryLock>> {
        let props = options.build();
        let keys = normalize_keys(keys);
        for attempt in 1..=props.retry.attempts {
            match self.provider.acquire(&keys, &props, context).await? {
                Some(provider_lock) => {
                    trace!(context, attempt, "acquired advisory lock");
                    return Ok(Some(AdvisoryLock::new(keys, props, provider_lock)));
                }
                None if attempt < props.retry.attempts => {
                    tokio::time::sleep(props.retry.delay).await;
                }
                None => {}
            }
        }
        record_contention(context);
        debug!(context, attempts = props.retry.attempts, "advisory lock contended, giving up");
        Ok(None)
    }

    /// Single-attempt variant of [`acquire_lock`]: probe once, never sleep.
    ///
    /// # Errors
    ///
    /// Propagates provider faults. Contention is `Ok(None)`.
    ///
    /// [`acquire_lock`]: LockService::acquire_lock
    pub async fn try_acquire_lock(
        &self,
        keys: &[String],
        context: &str,
        options: LockOptions,
    ) -> Result<Option<AdvisoryLock>> {
        let props = options.build();
        let keys = normalize_keys(keys);
        match self.provider.acquire(&keys, &props, context).await? {
            Some(provider_lock) => Ok(Some(AdvisoryLock::new(keys, props, provider_lock))),
            None => Ok(None),
        }
    }

    /// Renew the lease of `lock`. On success the returned handle supersedes
    /// the old one; `Ok(None)` means ownership was lost in the meantime.
    ///
    /// # Errors
    ///
    /// Propagates provider faults.
    pub async fn extend_lock(&self, lock: &AdvisoryLock) -> Result<Option<AdvisoryLock>> {
        match self.provider.extend(lock).await? {
            Some(provider_lock) => Ok(Some(AdvisoryLock::new(
                lock.resource_keys().to_vec(),
                *lock.props(),
                provider_lock,
            ))),
            None => Ok(None),
        }
    }

    /// Release `lock`. Safe to call on an expired or already-released lock.
    ///
    /// # Errors
    ///
    /// Propagates provider faults.
    pub async fn release_lock(&self, lock: &AdvisoryLock) -> Result<()> {
        self.provider.release(lock).await
    }

    /// Run `compute` under a lock when possible.
    ///
    /// Acquires with retries; on contention or provider failure `compute`
    /// runs anyway, without the lock. The lock is always released before
    /// this returns, whether `compute` succeeded or not.
    pub async fn using_lock<V, E, F, Fut>(
        &self,
        keys: &[String],
        context: &str,
        options: LockOptions,
        compute: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        match self.acquire_lock(keys, context, options).await {
            Ok(Some(lock)) => {
                let result = compute().await;
                self.release_quietly(&lock, context).await;
                result
            }
            Ok(None) => {
                debug!(context, "lock contended, computing without it");
                compute().await
            }
            Err(error) => {
                warn!(context, error = %error, "lock provider failed, computing without a lock");
                compute().await
            }
        }
    }

    /// The test-then-lock loop for single expensive values.
    ///
    /// Each round first asks `test_value` whether someone else already
    /// published the answer; only then is a single lock probe made. On a won
    /// probe `compute` runs under the lock. When retries run out `compute`
    /// runs without one.
    pub async fn using_optimistic_lock<V, E, T, TFut, C, CFut>(
        &self,
        keys: &[String],
        context: &str,
        options: LockOptions,
        test_value: T,
        compute: C,
    ) -> std::result::Result<V, E>
    where
        T: Fn() -> TFut,
        TFut: Future<Output = std::result::Result<Option<V>, E>>,
        C: Fn() -> CFut,
        CFut: Future<Output = std::result::Result<V, E>>,
    {
        let props = options.build();
        let keys = normalize_keys(keys);
        for attempt in 1..=props.retry.attempts {
            if let Some(value) = test_value().await? {
                trace!(context, attempt, "optimistic test found a published value");
                return Ok(value);
            }
            match self.probe(&keys, context, &props).await {
                Some(lock) => {
                    let result = compute().await;
                    self.release_quietly(&lock, context).await;
                    return result;
                }
                None if attempt < props.retry.attempts => {
                    tokio::time::sleep(props.retry.delay).await;
                }
                None => {}
            }
        }
        record_contention(context);
        debug!(context, "optimistic lock retries exhausted, computing without a lock");
        compute().await
    }

    /// The shrinking-set loop for batched lookups.
    ///
    /// Each round `fetch_cached` reports which of the still-missing keys
    /// became resolvable (typically because another worker published them);
    /// those leave the remaining set. A lock is then probed on exactly the
    /// remainder, and the first won probe runs `compute` on it. When retries
    /// run out the remainder is computed without a lock.
    ///
    /// Resolved and computed pairs are returned together; keys `compute`
    /// chooses not to return are simply absent from the result.
    pub async fn using_incremental_locks<V, E, F, FFut, C, CFut>(
        &self,
        keys: &[String],
        context: &str,
        options: LockOptions,
        fetch_cached: F,
        compute: C,
    ) -> std::result::Result<Vec<(String, V)>, E>
    where
        F: Fn(Vec<String>) -> FFut,
        FFut: Future<Output = std::result::Result<Vec<(String, V)>, E>>,
        C: Fn(Vec<String>) -> CFut,
        CFut: Future<Output = std::result::Result<Vec<(String, V)>, E>>,
    {
        let props = options.build();
        let mut remaining = normalize_keys(keys);
        let mut resolved: Vec<(String, V)> = Vec::new();

        for attempt in 1..=props.retry.attempts {
            if remaining.is_empty() {
                return Ok(resolved);
            }

            let found = fetch_cached(remaining.clone()).await?;
            if !found.is_empty() {
                remaining.retain(|key| !found.iter().any(|(candidate, _)| candidate == key));
                resolved.extend(found);
                if remaining.is_empty() {
                    return Ok(resolved);
                }
            }

            match self.probe(&remaining, context, &props).await {
                Some(lock) => {
                    let computed = compute(remaining.clone()).await;
                    self.release_quietly(&lock, context).await;
                    resolved.extend(computed?);
                    return Ok(resolved);
                }
                None if attempt < props.retry.attempts => {
                    tokio::time::sleep(props.retry.delay).await;
                }
                None => {}
            }
        }

        record_contention(context);
        debug!(
            context,
            remaining = remaining.len(),
            "incremental lock retries exhausted, computing the remainder without a lock"
        );
        resolved.extend(compute(remaining).await?);
        Ok(resolved)
    }

    /// One silent acquisition attempt. Provider faults count as contention.
    async fn probe(&self, keys: &[String], context: &str, props: &LockProps) -> Option<AdvisoryLock> {
        match self.provider.acquire(keys, props, context).await {
            Ok(Some(provider_lock)) => {
                Some(AdvisoryLock::new(keys.to_vec(), *props, provider_lock))
            }
            Ok(None) => None,
            Err(error) => {
                warn!(context, error = %error, "lock provider failed, treating as contended");
                None
            }
        }
    }

    async fn release_quietly(&self, lock: &AdvisoryLock, context: &str) {
        if let Err(error) = self.release_lock(lock).await {
            warn!(context, error = %error, "failed to release advisory lock, lease expires on its own");
        }
    }
}

/// Locks are always taken in sorted order over a deduplicated key set, so
/// overlapping multi-key acquisitions cannot deadlock.
fn normalize_keys(keys: &[String]) -> Vec<String> {
    let mut keys = keys.to_vec();
    keys.sort();
    keys.dedup();
    keys
}

fn record_contention(context: &str) {
    metrics::counter!(CONTENTION_COUNTER, "context" => context.to_string()).increment(1);
}
