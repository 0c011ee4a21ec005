//! In-process advisory lock provider.
//!
//! The reference implementation of [`AdvisoryLockProvider`]: a single mutex
//! around a key table. Good for tests and single-process deployments; a
//! fleet shares locks through the Redis provider instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{LockError, Result};
use crate::lock::{AdvisoryLock, LockProps, ProviderLock};
use crate::provider::AdvisoryLockProvider;

/// How often the background sweeper drops expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct LocalResourceLock {
    token: Uuid,
    expires_at: OffsetDateTime,
}

/// Lock provider backed by an in-process table.
///
/// Every operation takes the table mutex once, so multi-key acquisition is
/// atomic by construction. Expired leases are ignored by readers and
/// physically removed by [`sweep_expired`], either called directly or from
/// the task started by [`spawn_sweeper`].
///
/// [`sweep_expired`]: LocalLockProvider::sweep_expired
/// [`spawn_sweeper`]: LocalLockProvider::spawn_sweeper
#[derive(Debug, Clone, Default)]
pub struct LocalLockProvider {
    locks: Arc<Mutex<HashMap<String, LocalResourceLock>>>,
}

impl LocalLockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every lease whose expiry has passed. Returns how many were
    /// removed.
    pub fn sweep_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, held| held.expires_at > now);
        before - locks.len()
    }

    /// Start a background task sweeping expired leases every
    /// [`SWEEP_INTERVAL`].
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let provider = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let swept = provider.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept, "swept expired advisory locks");
                }
            }
        })
    }

    /// Number of leases currently recorded, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[async_trait]
impl AdvisoryLockProvider for LocalLockProvider {
    async fn acquire(
        &self,
        resource_keys: &[String],
        props: &LockProps,
        _context: &str,
    ) -> Result<Option<ProviderLock>> {
        if resource_keys.is_empty() {
            return Err(LockError::configuration("cannot lock an empty key set"));
        }

        let now = OffsetDateTime::now_utc();
        let mut locks = self.locks.lock();

        let contended = resource_keys
            .iter()
            .any(|key| locks.get(key).is_some_and(|held| held.expires_at > now));
        if contended {
            return Ok(None);
        }

        let token = Uuid::new_v4();
        let expires_at = now + props.duration;
        for key in resource_keys {
            locks.insert(
                key.clone(),
                LocalResourceLock { token, expires_at },
            );
        }
        Ok(Some(ProviderLock::new(token, expires_at)))
    }

    async fn extend(&self, lock: &AdvisoryLock) -> Result<Option<ProviderLock>> {
        let token = lock.provider_lock().token();
        let mut locks = self.locks.lock();

        let owns_all = lock
            .resource_keys()
            .iter()
            .all(|key| locks.get(key).is_some_and(|held| held.token == token));
        if !owns_all {
            return Ok(None);
        }

        let next_token = Uuid::new_v4();
        let expires_at = OffsetDateTime::now_utc() + lock.props().duration;
        for key in lock.resource_keys() {
            locks.insert(
                key.clone(),
                LocalResourceLock {
                    token: next_token,
                    expires_at,
                },
            );
        }
        Ok(Some(ProviderLock::new(next_token, expires_at)))
    }

    async fn release(&self, lock: &AdvisoryLock) -> Result<()> {
        let token = lock.provider_lock().token();
        let mut locks = self.locks.lock();
        for key in lock.resource_keys() {
            if locks.get(key).is_some_and(|held| held.token == token) {
                locks.remove(key);
            }
        }
        Ok(())
    }
}
