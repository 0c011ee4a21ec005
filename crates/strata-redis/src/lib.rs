pub mod config;
pub mod fleet;
pub mod lock;
pub mod provider;

pub use config::RedisConfig;
pub use fleet::{fleet_channel, FleetCacheManager, FleetMessage, FleetSubscriber};
pub use lock::RedisLockProvider;
pub use provider::RedisCacheProvider;

use tracing::{info, warn};

/// Create a connection pool per the configuration, or fall back to
/// in-process operation.
///
/// Disabled configuration or an unreachable Redis yields `None`; callers
/// then wire memory tiers and the in-process lock provider instead. The
/// degraded mode keeps single-process semantics intact, it only loses
/// cross-process sharing.
pub async fn create_redis_pool(config: &RedisConfig) -> Option<deadpool_redis::Pool> {
    if !config.enabled {
        info!("redis disabled, running on in-process tiers only");
        return None;
    }

    info!(url = %config.url, "connecting to redis");
    let pool = match config.create_pool() {
        Ok(pool) => pool,
        Err(error) => {
            warn!(error = %error, "failed to create redis pool, falling back to in-process tiers");
            return None;
        }
    };

    match pool.get().await {
        Ok(_) => {
            info!("connected to redis");
            Some(pool)
        }
        Err(error) => {
            warn!(error = %error, "redis unreachable, falling back to in-process tiers");
            None
        }
    }
}
