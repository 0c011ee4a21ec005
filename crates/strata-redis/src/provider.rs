//! Redis-backed cache tier.
//!
//! Entries are stored as MessagePack envelopes carrying the value and its
//! horizons. The live horizon additionally becomes the Redis `PX` expiry,
//! so the server reaps dead entries on its own; bulk eviction runs as a
//! server-side scan-and-delete script instead of shipping keys around.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::debug;

use strata_cache::CacheProvider;
use strata_core::error::{CacheError, Result};
use strata_core::{CacheEntry, CacheProps, FullKey, KeyPattern};

const EVICT_SCRIPT: &str = r#"
local cursor = "0"
local removed = 0
repeat
    local result = redis.call("SCAN", cursor, "MATCH", ARGV[1], "COUNT", 200)
    cursor = result[1]
    for _, key in ipairs(result[2]) do
        redis.call("DEL", key)
        removed = removed + 1
    end
until cursor == "0"
return removed
"#;

/// Networked tier shared by every process of a fleet.
pub struct RedisCacheProvider<T> {
    name: String,
    props: CacheProps,
    pool: Pool,
    key_prefix: String,
    evict_script: Script,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisCacheProvider<T> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        props: CacheProps,
        pool: Pool,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            props,
            pool,
            key_prefix: key_prefix.into(),
            evict_script: Script::new(EVICT_SCRIPT),
            _marker: PhantomData,
        }
    }

    fn redis_key(&self, key: &FullKey) -> String {
        format!("{}{}", self.key_prefix, key.as_str())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::tier(&self.name, format!("connection unavailable: {e}")))
    }
}

fn remaining_millis(live_until: Option<OffsetDateTime>) -> Option<i64> {
    live_until.map(|live| {
        let remaining = (live - OffsetDateTime::now_utc()).whole_milliseconds();
        i64::try_from(remaining).unwrap_or(i64::MAX).max(1)
    })
}

#[async_trait]
impl<T> CacheProvider<T> for RedisCacheProvider<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn props(&self) -> &CacheProps {
        &self.props
    }

    async fn get_values(&self, keys: &[FullKey]) -> Result<HashMap<FullKey, CacheEntry<T>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(self.redis_key(key));
        }
        let rows: Vec<Option<Vec<u8>>> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::tier(&self.name, format!("MGET failed: {e}")))?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, row) in keys.iter().zip(rows) {
            let Some(bytes) = row else {
                continue;
            };
            let entry: CacheEntry<T> = rmp_serde::from_slice(&bytes).map_err(|e| {
                CacheError::serialization(format!("stored entry for '{key}' is malformed: {e}"))
            })?;
            // PX should have reaped it already; clocks may disagree.
            if !entry.is_dead() {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
    }

    async fn put_values(&self, entries: &[(FullKey, Option<CacheEntry<T>>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, entry) in entries {
            let redis_key = self.redis_key(key);
            match entry {
                Some(entry) if !entry.is_dead() => {
                    let limited = entry.clone().limit(&self.props);
                    let payload = rmp_serde::to_vec_named(&limited).map_err(|e| {
                        CacheError::serialization(format!(
                            "entry for '{key}' does not encode: {e}"
                        ))
                    })?;
                    match remaining_millis(limited.live_until) {
                        Some(px) => {
                            pipe.cmd("SET").arg(&redis_key).arg(payload).arg("PX").arg(px);
                        }
                        None => {
                            pipe.cmd("SET").arg(&redis_key).arg(payload);
                        }
                    }
                }
                // Tombstones and dead-on-arrival entries both delete.
                _ => {
                    pipe.cmd("DEL").arg(&redis_key);
                }
            }
            pipe.ignore();
        }
        let mut conn = self.connection().await?;
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::tier(&self.name, format!("pipelined write failed: {e}")))?;
        Ok(())
    }

    async fn remove_all(&self, pattern: &KeyPattern) -> Result<()> {
        let match_expr = format!("{}{}", self.key_prefix, pattern.as_match_expr());
        let mut conn = self.connection().await?;
        let removed: u64 = self
            .evict_script
            .arg(&match_expr)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::tier(&self.name, format!("scan-and-delete failed: {e}")))?;
        debug!(tier = %self.name, pattern = %match_expr, removed, "redis tier eviction");
        Ok(())
    }
}
