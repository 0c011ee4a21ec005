//! The tiered cache orchestrator.
//!
//! A [`Cache`] owns an ordered stack of tiers (highest priority first) and a
//! lock service. Reads walk the stack top-down and backfill upwards, writes
//! fan out to every tier, and misses are resolved through the incremental
//! lock pattern so that concurrent callers mostly trigger one fetch instead
//! of a dogpile. "Mostly" is deliberate: locking here is best-effort
//! coordination, which is why fetch callbacks must be idempotent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use strata_core::error::{CacheError, Result};
use strata_core::{CacheEntry, FullKey, KeyPattern, Namespace, ResourceKey, Sector};
use strata_lock::{LockOptions, LockService};

use crate::metrics::{record_cache_hit, record_cache_misses, record_revalidation};
use crate::provider::CacheProvider;

/// Source of truth for cache misses.
///
/// `fetch` receives the keys that need computing and returns whatever pairs
/// it can produce; keys it omits stay unresolved. It must be idempotent:
/// under lock contention or a degraded lock backend the same keys may be
/// fetched by several workers at once.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self, keys: Vec<ResourceKey>) -> Result<Vec<(ResourceKey, T)>>;
}

/// Adapter turning an async closure into a [`Fetcher`].
pub struct FetchFn<F>(F);

impl<F> FetchFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for FetchFn<F>
where
    T: Send + 'static,
    F: Fn(Vec<ResourceKey>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<(ResourceKey, T)>>> + Send,
{
    async fn fetch(&self, keys: Vec<ResourceKey>) -> Result<Vec<(ResourceKey, T)>> {
        (self.0)(keys).await
    }
}

/// Wrap an async closure into a shareable [`Fetcher`].
pub fn fetch_with<T, F, Fut>(f: F) -> Arc<dyn Fetcher<T>>
where
    T: Send + 'static,
    F: Fn(Vec<ResourceKey>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<(ResourceKey, T)>>> + Send + 'static,
{
    Arc::new(FetchFn::new(f))
}

struct CacheInner<T> {
    name: String,
    providers: Vec<Arc<dyn CacheProvider<T>>>,
    locks: LockService,
    lock_options: LockOptions,
}

/// A named, tiered, lock-coordinated cache of `T` values.
///
/// Cheap to clone; clones share tiers and lock service.
pub struct Cache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`Cache`]. Tiers are added highest priority first.
pub struct CacheBuilder<T> {
    name: String,
    providers: Vec<Arc<dyn CacheProvider<T>>>,
    locks: Option<LockService>,
    lock_options: LockOptions,
}

impl<T> CacheBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            locks: None,
            lock_options: LockOptions::new(),
        }
    }

    /// Append a tier below the ones already added.
    #[must_use]
    pub fn tier(mut self, provider: Arc<dyn CacheProvider<T>>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Lock service shared with other caches. Defaults to an in-process one.
    #[must_use]
    pub fn lock_service(mut self, locks: LockService) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Acquisition options used for miss resolution and revalidation locks.
    #[must_use]
    pub fn lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    /// # Errors
    ///
    /// Fails when no tier was added.
    pub fn build(self) -> Result<Cache<T>> {
        if self.providers.is_empty() {
            return Err(CacheError::configuration(format!(
                "cache '{}' needs at least one tier",
                self.name
            )));
        }
        Ok(Cache {
            inner: Arc::new(CacheInner {
                name: self.name,
                providers: self.providers,
                locks: self.locks.unwrap_or_else(LockService::in_process),
                lock_options: self.lock_options,
            }),
        })
    }
}

impl<T> Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn builder(name: impl Into<String>) -> CacheBuilder<T> {
        CacheBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn providers(&self) -> &[Arc<dyn CacheProvider<T>>] {
        &self.inner.providers
    }

    /// Fetch one value, computing it through `fetch` on a miss.
    ///
    /// # Errors
    ///
    /// Propagates tier faults and fetch failures.
    pub async fn fetch_value(
        &self,
        namespace: &Namespace,
        key: &ResourceKey,
        fetch: Arc<dyn Fetcher<T>>,
    ) -> Result<Option<T>> {
        let mut values = self
            .fetch_values(namespace, std::slice::from_ref(key), fetch)
            .await?;
        Ok(values.pop().map(|(_, value)| value))
    }

    /// Fetch a batch of values, computing misses through `fetch`.
    ///
    /// Served entries that turned stale are returned immediately and
    /// refreshed by a background task holding the revalidation lock; misses
    /// are resolved under the incremental lock pattern. Keys neither cached
    /// nor produced by `fetch` are absent from the result, which otherwise
    /// preserves the order of `keys`.
    ///
    /// # Errors
    ///
    /// Propagates tier faults and fetch failures. Lock trouble is never an
    /// error here; at worst it costs extra fetches.
    pub async fn fetch_values(
        &self,
        namespace: &Namespace,
        keys: &[ResourceKey],
        fetch: Arc<dyn Fetcher<T>>,
    ) -> Result<Vec<(ResourceKey, T)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if namespace.is_disabled() {
            debug!(cache = %self.inner.name, "caching disabled for this call, fetching directly");
            return fetch.fetch(keys.to_vec()).await;
        }

        // Duplicate caller keys collapse on the full key.
        let mut by_full: HashMap<FullKey, ResourceKey> = HashMap::with_capacity(keys.len());
        for key in keys {
            by_full.insert(
                FullKey::compose(&self.inner.name, namespace, key),
                key.clone(),
            );
        }
        let by_full = Arc::new(by_full);
        let lock_keys: Vec<String> = by_full.keys().map(|k| k.as_str().to_string()).collect();
        let context = format!("cache:{}", self.inner.name);

        let fetch_cached = |remaining: Vec<String>| {
            let this = self.clone();
            async move {
                let wanted: Vec<FullKey> = remaining.into_iter().map(FullKey::from).collect();
                let found = this.get_cached_raw(&wanted, true).await?;
                Ok(found
                    .into_iter()
                    .map(|(key, entry)| (key.into_string(), entry))
                    .collect::<Vec<_>>())
            }
        };

        let compute = |remaining: Vec<String>| {
            let this = self.clone();
            let fetch = Arc::clone(&fetch);
            let by_full = Arc::clone(&by_full);
            let namespace = namespace.clone();
            async move {
                let mut wanted: Vec<ResourceKey> = Vec::with_capacity(remaining.len());
                for raw in remaining {
                    if let Some(resource) = by_full.get(&FullKey::from(raw)) {
                        wanted.push(resource.clone());
                    }
                }
                let stored = this.fetch_and_store(&namespace, &wanted, fetch.as_ref()).await?;
                Ok(stored
                    .into_iter()
                    .map(|(full, entry)| (full.into_string(), entry))
                    .collect::<Vec<_>>())
            }
        };

        let resolved = self
            .inner
            .locks
            .using_incremental_locks(
                &lock_keys,
                &context,
                self.inner.lock_options,
                fetch_cached,
                compute,
            )
            .await?;

        // Hand stale entries to the background refresher, serve them anyway.
        let mut values: HashMap<ResourceKey, T> = HashMap::with_capacity(resolved.len());
        let mut stale: Vec<ResourceKey> = Vec::new();
        for (raw, entry) in resolved {
            let Some(resource) = by_full.get(&FullKey::from(raw)) else {
                continue;
            };
            if entry.is_stale() {
                stale.push(resource.clone());
            }
            values.insert(resource.clone(), entry.value);
        }
        if !stale.is_empty() {
            self.spawn_revalidation(namespace.clone(), stale, Arc::clone(&fetch));
        }

        let mut results = Vec::with_capacity(values.len());
        for key in keys {
            if let Some(value) = values.remove(key) {
                results.push((key.clone(), value));
            }
        }
        Ok(results)
    }

    /// Read without computing misses.
    ///
    /// With `allow_stale` false, stale entries count as misses. No
    /// revalidation is triggered; this is a plain lookup.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    pub async fn get_cached_values(
        &self,
        namespace: &Namespace,
        keys: &[ResourceKey],
        allow_stale: bool,
    ) -> Result<Vec<(ResourceKey, T)>> {
        if keys.is_empty() || namespace.is_disabled() {
            return Ok(Vec::new());
        }
        let mut by_full: HashMap<FullKey, ResourceKey> = HashMap::with_capacity(keys.len());
        for key in keys {
            by_full.insert(
                FullKey::compose(&self.inner.name, namespace, key),
                key.clone(),
            );
        }
        let wanted: Vec<FullKey> = by_full.keys().cloned().collect();
        let found = self.get_cached_raw(&wanted, allow_stale).await?;

        let mut values: HashMap<ResourceKey, T> = HashMap::with_capacity(found.len());
        for (full, entry) in found {
            if let Some(resource) = by_full.get(&full) {
                values.insert(resource.clone(), entry.value);
            }
        }
        let mut results = Vec::with_capacity(values.len());
        for key in keys {
            if let Some(value) = values.remove(key) {
                results.push((key.clone(), value));
            }
        }
        Ok(results)
    }

    /// Write one value through every tier. `None` deletes the key everywhere.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    pub async fn write_value(
        &self,
        namespace: &Namespace,
        key: &ResourceKey,
        value: Option<T>,
    ) -> Result<()> {
        self.write_values(namespace, vec![(key.clone(), value)])
            .await
    }

    /// Write a batch of values through every tier.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    pub async fn write_values(
        &self,
        namespace: &Namespace,
        entries: Vec<(ResourceKey, Option<T>)>,
    ) -> Result<()> {
        self.write_entries(
            namespace,
            entries
                .into_iter()
                .map(|(key, value)| (key, value.map(CacheEntry::of)))
                .collect(),
        )
        .await
    }

    /// Write entries carrying explicit horizons. Horizons are hints: each
    /// tier still tightens them to its own policy.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    pub async fn write_entries(
        &self,
        namespace: &Namespace,
        entries: Vec<(ResourceKey, Option<CacheEntry<T>>)>,
    ) -> Result<()> {
        if namespace.is_disabled() || entries.is_empty() {
            return Ok(());
        }
        let entries: Vec<(FullKey, Option<CacheEntry<T>>)> = entries
            .into_iter()
            .map(|(key, entry)| {
                (
                    FullKey::compose(&self.inner.name, namespace, &key),
                    entry,
                )
            })
            .collect();
        self.put_to_all(&entries).await
    }

    /// Delete every key under `sector` from every tier.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    pub async fn evict_all(&self, sector: &Sector) -> Result<()> {
        let pattern = KeyPattern::for_sector(&self.inner.name, sector);
        debug!(cache = %self.inner.name, sector = %sector, "evicting sector");
        futures_util::future::try_join_all(
            self.inner
                .providers
                .iter()
                .map(|provider| provider.remove_all(&pattern)),
        )
        .await?;
        Ok(())
    }

    /// Walk the tier stack top-down, backfilling hits into the tiers above.
    async fn get_cached_raw(
        &self,
        keys: &[FullKey],
        allow_stale: bool,
    ) -> Result<HashMap<FullKey, CacheEntry<T>>> {
        let mut resolved = HashMap::with_capacity(keys.len());
        let mut missing: Vec<FullKey> = keys.to_vec();

        for (tier_index, provider) in self.inner.providers.iter().enumerate() {
            if missing.is_empty() {
                break;
            }
            let found = provider.get_values(&missing).await?;
            let mut still_missing = Vec::with_capacity(missing.len());
            let mut backfill: Vec<(FullKey, Option<CacheEntry<T>>)> = Vec::new();
            for key in missing {
                match found.get(&key) {
                    Some(entry) if !entry.is_dead() && (allow_stale || !entry.is_stale()) => {
                        record_cache_hit(provider.name());
                        if tier_index > 0 {
                            backfill.push((key.clone(), Some(entry.clone())));
                        }
                        resolved.insert(key, entry.clone());
                    }
                    _ => still_missing.push(key),
                }
            }
            if !backfill.is_empty() {
                for higher in &self.inner.providers[..tier_index] {
                    higher.put_values(&backfill).await?;
                }
            }
            missing = still_missing;
        }

        record_cache_misses(missing.len() as u64);
        Ok(resolved)
    }

    /// Fetch `keys` from the source of truth and write the results through
    /// every tier. Returns what was stored.
    async fn fetch_and_store(
        &self,
        namespace: &Namespace,
        keys: &[ResourceKey],
        fetch: &dyn Fetcher<T>,
    ) -> Result<Vec<(FullKey, CacheEntry<T>)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let fetched = fetch.fetch(keys.to_vec()).await?;
        let stored: Vec<(FullKey, CacheEntry<T>)> = fetched
            .into_iter()
            .map(|(key, value)| {
                (
                    FullKey::compose(&self.inner.name, namespace, &key),
                    CacheEntry::of(value),
                )
            })
            .collect();
        if !stored.is_empty() {
            let entries: Vec<(FullKey, Option<CacheEntry<T>>)> = stored
                .iter()
                .map(|(key, entry)| (key.clone(), Some(entry.clone())))
                .collect();
            self.put_to_all(&entries).await?;
        }
        Ok(stored)
    }

    async fn put_to_all(&self, entries: &[(FullKey, Option<CacheEntry<T>>)]) -> Result<()> {
        futures_util::future::try_join_all(
            self.inner
                .providers
                .iter()
                .map(|provider| provider.put_values(entries)),
        )
        .await?;
        Ok(())
    }

    /// Refresh stale keys in the background. The task competes for the
    /// revalidation lock; losing it means another process is already on it.
    fn spawn_revalidation(
        &self,
        namespace: Namespace,
        keys: Vec<ResourceKey>,
        fetch: Arc<dyn Fetcher<T>>,
    ) {
        record_revalidation(&self.inner.name);
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(error) = cache.revalidate(&namespace, &keys, fetch).await {
                warn!(
                    cache = %cache.inner.name,
                    error = %error,
                    "background revalidation failed"
                );
            }
        });
    }

    async fn revalidate(
        &self,
        namespace: &Namespace,
        keys: &[ResourceKey],
        fetch: Arc<dyn Fetcher<T>>,
    ) -> Result<()> {
        let lock_keys: Vec<String> = keys
            .iter()
            .map(|key| FullKey::compose(&self.inner.name, namespace, key).into_string())
            .collect();
        let context = format!("cache:{}:revalidate", self.inner.name);

        match self
            .inner
            .locks
            .acquire_lock(&lock_keys, &context, self.inner.lock_options)
            .await
        {
            Ok(Some(lock)) => {
                let result = self
                    .fetch_and_store(namespace, keys, fetch.as_ref())
                    .await
                    .map(|_| ());
                if let Err(error) = self.inner.locks.release_lock(&lock).await {
                    warn!(context = %context, error = %error, "failed to release revalidation lock");
                }
                result
            }
            Ok(None) => {
                debug!(context = %context, "revalidation lock contended, another process refreshes");
                Ok(())
            }
            Err(error) => {
                debug!(context = %context, error = %error, "lock provider unavailable, skipping revalidation");
                Ok(())
            }
        }
    }
}
