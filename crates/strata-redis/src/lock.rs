//! Redis-backed advisory lock provider.
//!
//! Each resource key becomes one Redis key holding the ownership token with
//! a `PX` lease, so a crashed holder is reclaimed by the server without any
//! sweeper. The all-or-nothing contract is kept by doing every multi-key
//! step inside a Lua script, which Redis runs atomically.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;
use time::OffsetDateTime;
use uuid::Uuid;

use strata_lock::{
    AdvisoryLock, AdvisoryLockProvider, LockError, LockProps, ProviderLock, Result,
};

const ACQUIRE_SCRIPT: &str = r#"
for i = 1, #KEYS do
    if redis.call("EXISTS", KEYS[i]) == 1 then
        return 0
    end
end
for i = 1, #KEYS do
    redis.call("SET", KEYS[i], ARGV[1], "PX", ARGV[2])
end
return 1
"#;

const EXTEND_SCRIPT: &str = r#"
for i = 1, #KEYS do
    if redis.call("GET", KEYS[i]) ~= ARGV[1] then
        return 0
    end
end
for i = 1, #KEYS do
    redis.call("SET", KEYS[i], ARGV[2], "PX", ARGV[3])
end
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
for i = 1, #KEYS do
    if redis.call("GET", KEYS[i]) == ARGV[1] then
        redis.call("DEL", KEYS[i])
    end
end
return 1
"#;

/// Lock provider arbitrating across every process that shares the Redis.
pub struct RedisLockProvider {
    pool: Pool,
    key_prefix: String,
    acquire_script: Script,
    extend_script: Script,
    release_script: Script,
}

impl RedisLockProvider {
    #[must_use]
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: format!("{}lock:", key_prefix.into()),
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    fn lock_key(&self, resource_key: &str) -> String {
        format!("{}{}", self.key_prefix, resource_key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| LockError::provider(format!("redis connection unavailable: {e}")))
    }
}

fn lease_millis(props: &LockProps) -> u64 {
    u64::try_from(props.duration.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

#[async_trait]
impl AdvisoryLockProvider for RedisLockProvider {
    async fn acquire(
        &self,
        resource_keys: &[String],
        props: &LockProps,
        _context: &str,
    ) -> Result<Option<ProviderLock>> {
        if resource_keys.is_empty() {
            return Err(LockError::configuration("cannot lock an empty key set"));
        }

        let token = Uuid::new_v4();
        let mut conn = self.connection().await?;
        let mut invocation = self.acquire_script.prepare_invoke();
        for key in resource_keys {
            invocation.key(self.lock_key(key));
        }
        invocation.arg(token.to_string()).arg(lease_millis(props));
        let granted: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::provider(format!("acquire script failed: {e}")))?;

        if granted == 1 {
            Ok(Some(ProviderLock::new(
                token,
                OffsetDateTime::now_utc() + props.duration,
            )))
        } else {
            Ok(None)
        }
    }

    async fn extend(&self, lock: &AdvisoryLock) -> Result<Option<ProviderLock>> {
        let next_token = Uuid::new_v4();
        let mut conn = self.connection().await?;
        let mut invocation = self.extend_script.prepare_invoke();
        for key in lock.resource_keys() {
            invocation.key(self.lock_key(key));
        }
        invocation
            .arg(lock.provider_lock().token().to_string())
            .arg(next_token.to_string())
            .arg(lease_millis(lock.props()));
        let renewed: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::provider(format!("extend script failed: {e}")))?;

        if renewed == 1 {
            Ok(Some(ProviderLock::new(
                next_token,
                OffsetDateTime::now_utc() + lock.props().duration,
            )))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, lock: &AdvisoryLock) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut invocation = self.release_script.prepare_invoke();
        for key in lock.resource_keys() {
            invocation.key(self.lock_key(key));
        }
        invocation.arg(lock.provider_lock().token().to_string());
        let _: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::provider(format!("release script failed: {e}")))?;
        Ok(())
    }
}
