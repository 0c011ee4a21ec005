//! The cache registry and its wire-friendly admin surface.
//!
//! A [`CacheManager`] holds every cache of a process under its unique name.
//! Caches of different value types live side by side behind [`ManagedCache`],
//! which narrows a typed [`Cache`] down to name-addressed operations with
//! JSON payloads. That narrowed surface is exactly what fleet invalidation
//! messages carry, so anything expressible here can be replayed on another
//! process.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strata_core::error::{CacheError, Result};
use strata_core::{Namespace, ResourceKey, Sector};

use crate::cache::Cache;

/// Admin summary of one cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSummary {
    pub name: String,
    pub tiers: Vec<TierSummary>,
}

/// Admin summary of one tier's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSummary {
    pub name: String,
    pub max_size: Option<u64>,
    pub time_to_live_ms: Option<u64>,
    pub time_to_stale_ms: Option<u64>,
}

impl TierSummary {
    fn new(name: &str, props: &strata_core::CacheProps) -> Self {
        let millis = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            name: name.to_string(),
            max_size: props.max_size,
            time_to_live_ms: props.time_to_live.map(millis),
            time_to_stale_ms: props.time_to_stale.map(millis),
        }
    }
}

/// A write addressed by cache name, replayable on any process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWriteRequest {
    pub cache: String,
    /// Raw namespace segments, unescaped.
    pub namespace: Vec<String>,
    pub entries: Vec<CacheWriteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWriteEntry {
    pub key: String,
    /// `None` deletes the key from every tier.
    pub value: Option<Value>,
}

/// A sector eviction addressed by cache name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEvictRequest {
    pub cache: String,
    /// Raw sector segments, unescaped. Empty means the whole cache.
    pub sector: Vec<String>,
}

/// Type-erased cache surface held by the registry.
#[async_trait]
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    fn summary(&self) -> CacheSummary;

    /// Write JSON payloads through the cache. The whole batch is decoded
    /// before anything is written, so a payload incompatible with the
    /// cache's value type fails the request without partial effects.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for incompatible payloads, otherwise
    /// propagates tier faults.
    async fn write(
        &self,
        namespace: &Namespace,
        entries: Vec<(ResourceKey, Option<Value>)>,
    ) -> Result<()>;

    /// Delete every key under `sector`.
    ///
    /// # Errors
    ///
    /// Propagates tier faults.
    async fn evict(&self, sector: &Sector) -> Result<()>;
}

#[async_trait]
impl<T> ManagedCache for Cache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn summary(&self) -> CacheSummary {
        CacheSummary {
            name: Cache::name(self).to_string(),
            tiers: self
                .providers()
                .iter()
                .map(|provider| TierSummary::new(provider.name(), provider.props()))
                .collect(),
        }
    }

    async fn write(
        &self,
        namespace: &Namespace,
        entries: Vec<(ResourceKey, Option<Value>)>,
    ) -> Result<()> {
        let mut decoded: Vec<(ResourceKey, Option<T>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let value = match value {
                Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                    CacheError::serialization(format!(
                        "payload for key '{key}' does not fit cache '{}': {e}",
                        Cache::name(self)
                    ))
                })?),
                None => None,
            };
            decoded.push((key, value));
        }
        self.write_values(namespace, decoded).await
    }

    async fn evict(&self, sector: &Sector) -> Result<()> {
        self.evict_all(sector).await
    }
}

/// Registry of every cache in the process, keyed by unique name.
///
/// An explicit instance, created where the application wires things up and
/// passed to whoever needs it.
#[derive(Default)]
pub struct CacheManager {
    caches: DashMap<String, Arc<dyn ManagedCache>>,
}

impl CacheManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache under its name.
    ///
    /// # Errors
    ///
    /// Fails when the name is already taken.
    pub fn register(&self, cache: Arc<dyn ManagedCache>) -> Result<()> {
        let name = cache.name().to_string();
        match self.caches.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CacheError::configuration(format!(
                "cache '{name}' is already registered"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cache);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedCache>> {
        self.caches.get(name).map(|cache| Arc::clone(cache.value()))
    }

    /// Summaries of every registered cache, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<CacheSummary> {
        let mut summaries: Vec<CacheSummary> =
            self.caches.iter().map(|cache| cache.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Summary of one cache.
    ///
    /// # Errors
    ///
    /// Fails when no cache goes by `name`.
    pub fn summary_of(&self, name: &str) -> Result<CacheSummary> {
        self.get(name)
            .map(|cache| cache.summary())
            .ok_or_else(|| CacheError::unknown_cache(name))
    }

    /// Apply a write request to the addressed cache.
    ///
    /// # Errors
    ///
    /// Fails when the cache is unknown, the payload does not decode, or a
    /// tier fault occurs.
    pub async fn write(&self, request: CacheWriteRequest) -> Result<()> {
        let cache = self
            .get(&request.cache)
            .ok_or_else(|| CacheError::unknown_cache(&request.cache))?;
        let namespace = Namespace::of(&request.namespace);
        let entries = request
            .entries
            .into_iter()
            .map(|entry| (ResourceKey::new(entry.key), entry.value))
            .collect();
        cache.write(&namespace, entries).await
    }

    /// Apply an eviction request to the addressed cache.
    ///
    /// # Errors
    ///
    /// Fails when the cache is unknown or a tier fault occurs.
    pub async fn evict(&self, request: CacheEvictRequest) -> Result<()> {
        let cache = self
            .get(&request.cache)
            .ok_or_else(|| CacheError::unknown_cache(&request.cache))?;
        cache.evict(&Sector::of(&request.sector)).await
    }
}
