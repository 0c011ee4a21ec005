//! In-process cache tier backed by a concurrent map.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::debug;

use strata_core::error::Result;
use strata_core::{CacheEntry, CacheProps, FullKey, KeyPattern};

use crate::provider::CacheProvider;

/// One-in-N chance that an over-capacity insert triggers a cleanup.
const CLEANUP_PROBABILITY: u32 = 100;

/// Over this multiple of `max_size` a cleanup is forced on every insert.
const HARD_CAPACITY_MULTIPLIER: f64 = 1.5;

struct StoredEntry<T> {
    entry: CacheEntry<T>,
    written_at: OffsetDateTime,
}

/// Memory tier.
///
/// `max_size` is a soft cap: most over-capacity inserts are let through and
/// only occasionally pay for a cleanup, so the hot path stays cheap. Past
/// 1.5x the cap every insert cleans up until the tier is back under it.
/// Cleanup drops dead entries first and then evicts oldest-written entries.
pub struct MemoryCacheProvider<T> {
    name: String,
    props: CacheProps,
    entries: DashMap<FullKey, StoredEntry<T>>,
}

impl<T> MemoryCacheProvider<T> {
    #[must_use]
    pub fn new(name: impl Into<String>, props: CacheProps) -> Self {
        Self {
            name: name.into(),
            props,
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries, dead ones included until they are read or
    /// cleaned up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_capacity(&self) {
        let Some(max_size) = self.props.max_size else {
            return;
        };
        let len = self.entries.len() as u64;
        if len <= max_size {
            return;
        }
        let hard_limit = (max_size as f64 * HARD_CAPACITY_MULTIPLIER) as u64;
        if len < hard_limit && fastrand::u32(0..CLEANUP_PROBABILITY) != 0 {
            return;
        }
        self.cleanup(max_size);
    }

    fn cleanup(&self, max_size: u64) {
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.entry.is_dead());

        let len = self.entries.len() as u64;
        if len > max_size {
            let mut by_age: Vec<(FullKey, OffsetDateTime)> = self
                .entries
                .iter()
                .map(|item| (item.key().clone(), item.value().written_at))
                .collect();
            by_age.sort_by_key(|(_, written_at)| *written_at);
            for (key, _) in by_age.into_iter().take((len - max_size) as usize) {
                self.entries.remove(&key);
            }
        }

        debug!(
            tier = %self.name,
            removed = before - self.entries.len(),
            "memory tier cleanup"
        );
    }
}

#[async_trait]
impl<T> CacheProvider<T> for MemoryCacheProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn props(&self) -> &CacheProps {
        &self.props
    }

    async fn get_values(&self, keys: &[FullKey]) -> Result<HashMap<FullKey, CacheEntry<T>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            // The shard guard must drop before the remove below.
            let looked_up = self.entries.get(key).map(|stored| {
                if stored.entry.is_dead() {
                    None
                } else {
                    Some(stored.entry.clone())
                }
            });
            match looked_up {
                Some(Some(entry)) => {
                    found.insert(key.clone(), entry);
                }
                Some(None) => {
                    self.entries.remove(key);
                }
                None => {}
            }
        }
        Ok(found)
    }

    async fn put_values(&self, entries: &[(FullKey, Option<CacheEntry<T>>)]) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        for (key, entry) in entries {
            match entry {
                Some(entry) => {
                    self.entries.insert(
                        key.clone(),
                        StoredEntry {
                            entry: entry.clone().limit(&self.props),
                            written_at: now,
                        },
                    );
                }
                None => {
                    self.entries.remove(key);
                }
            }
        }
        self.enforce_capacity();
        Ok(())
    }

    async fn remove_all(&self, pattern: &KeyPattern) -> Result<()> {
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(())
    }
}
