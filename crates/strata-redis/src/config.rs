//! Redis connection settings for the networked tier, the distributed lock
//! backend and the fleet channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use strata_core::error::{CacheError, Result};

/// Redis configuration for horizontal scaling.
///
/// One connection pool serves the cache tier, the lock provider and fleet
/// publishing; only the pub/sub subscriber opens its own connection, since
/// `SUBSCRIBE` cannot run on a pooled one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. Disabled deployments run on in-process tiers only.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix put in front of every key this subsystem touches, so one
    /// Redis can host unrelated applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deployment identifier scoping the fleet channel. Environments that
    /// share a broker but carry different ids never cross-invalidate.
    #[serde(default = "default_deployment_id")]
    pub deployment_id: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_key_prefix() -> String {
    "strata:".to_string()
}

fn default_deployment_id() -> String {
    "local".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_key_prefix(),
            deployment_id: default_deployment_id(),
        }
    }
}

impl RedisConfig {
    /// # Errors
    ///
    /// Fails on an empty URL, a zero pool size or an empty deployment id.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.url.is_empty() {
            return Err(CacheError::configuration("redis.url must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(CacheError::configuration(
                "redis.pool_size must be at least 1",
            ));
        }
        if self.deployment_id.is_empty() {
            return Err(CacheError::configuration(
                "redis.deployment_id must not be empty",
            ));
        }
        Ok(())
    }

    /// Build a connection pool from these settings.
    ///
    /// # Errors
    ///
    /// Fails when the URL does not parse or the pool cannot be configured.
    pub fn create_pool(&self) -> Result<deadpool_redis::Pool> {
        let mut redis_config = deadpool_redis::Config::from_url(&self.url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = self.pool_size;
            pool_config.timeouts.wait = Some(Duration::from_millis(self.timeout_ms));
            pool_config.timeouts.create = Some(Duration::from_millis(self.timeout_ms));
            pool_config.timeouts.recycle = Some(Duration::from_millis(self.timeout_ms));
        }
        redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::configuration(format!("invalid redis pool config: {e}")))
    }
}

pub mod loader {
    use super::RedisConfig;
    use config::{Config, Environment, File};
    use serde::Deserialize;
    use std::path::PathBuf;
    use strata_core::error::{CacheError, Result};

    #[derive(Default, Deserialize)]
    struct FileConfig {
        #[serde(default)]
        redis: RedisConfig,
    }

    /// Load the `[redis]` section from an optional TOML file with
    /// environment variable overrides, e.g.,
    /// `STRATA__REDIS__URL=redis://cache:6379`.
    ///
    /// # Errors
    ///
    /// Fails when a source does not parse or validation rejects the merged
    /// result.
    pub fn load_config(path: Option<&str>) -> Result<RedisConfig> {
        let mut builder = Config::builder();
        let candidate = PathBuf::from(path.unwrap_or("strata.toml"));
        if candidate.exists() {
            builder = builder.add_source(File::from(candidate));
        }
        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: FileConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.redis.validate()?;
        Ok(merged.redis)
    }
}
