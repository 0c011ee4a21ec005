//! Fleet-wide cache mutation over Redis pub/sub.
//!
//! Every process keeps its own authoritative [`CacheManager`]. A mutation is
//! never applied locally first: it is published on the deployment's channel,
//! and every subscriber, the publisher included, applies it to its own local
//! manager. All processes converge through the same message. Delivery is
//! best effort; a process that was offline for a message self-corrects once
//! its stale entries expire.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use strata_cache::{CacheEvictRequest, CacheManager, CacheSummary, CacheWriteRequest};
use strata_core::error::{CacheError, Result};

use crate::config::RedisConfig;

/// One mutation on the fleet channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FleetMessage {
    Write(CacheWriteRequest),
    Evict(CacheEvictRequest),
}

/// Channel carrying [`FleetMessage`]s for one deployment.
///
/// Scoped by deployment id so environments sharing a broker do not
/// cross-invalidate.
#[must_use]
pub fn fleet_channel(config: &RedisConfig) -> String {
    format!("{}fleet:{}", config.key_prefix, config.deployment_id)
}

/// Mutation surface that fans out to the whole fleet.
///
/// Reads come straight from the local manager; writes and evictions go out
/// over pub/sub and land through the [`FleetSubscriber`] of each process.
pub struct FleetCacheManager {
    pool: Pool,
    channel: String,
    local: Arc<CacheManager>,
}

impl FleetCacheManager {
    #[must_use]
    pub fn new(pool: Pool, config: &RedisConfig, local: Arc<CacheManager>) -> Self {
        Self {
            pool,
            channel: fleet_channel(config),
            local,
        }
    }

    #[must_use]
    pub fn local(&self) -> &Arc<CacheManager> {
        &self.local
    }

    #[must_use]
    pub fn list(&self) -> Vec<CacheSummary> {
        self.local.list()
    }

    /// # Errors
    ///
    /// Fails when no cache goes by `name`.
    pub fn summary_of(&self, name: &str) -> Result<CacheSummary> {
        self.local.summary_of(name)
    }

    /// Publish a write for every process, this one included, to apply.
    ///
    /// # Errors
    ///
    /// Fails when the message does not encode or Redis rejects the publish.
    /// Local state is untouched either way; application happens through the
    /// subscriber.
    pub async fn write(&self, request: CacheWriteRequest) -> Result<()> {
        self.publish(&FleetMessage::Write(request)).await
    }

    /// Publish an eviction for every process to apply.
    ///
    /// # Errors
    ///
    /// Fails when the message does not encode or Redis rejects the publish.
    pub async fn evict(&self, request: CacheEvictRequest) -> Result<()> {
        self.publish(&FleetMessage::Evict(request)).await
    }

    async fn publish(&self, message: &FleetMessage) -> Result<()> {
        let payload = serde_json::to_string(message)
            .map_err(|e| CacheError::serialization(format!("fleet message does not encode: {e}")))?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::tier("redis", format!("connection unavailable: {e}")))?;
        let _: () = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| CacheError::tier("redis", format!("PUBLISH failed: {e}")))?;
        debug!(channel = %self.channel, "published fleet mutation");
        Ok(())
    }
}

/// Listener applying fleet mutations to this process's local manager.
///
/// `SUBSCRIBE` cannot run on a pooled connection, so the subscriber opens
/// its own client and reconnects with exponential backoff when the
/// connection drops.
pub struct FleetSubscriber {
    redis_url: String,
    channel: String,
    local: Arc<CacheManager>,
}

impl FleetSubscriber {
    #[must_use]
    pub fn new(config: &RedisConfig, local: Arc<CacheManager>) -> Self {
        Self {
            redis_url: config.url.clone(),
            channel: fleet_channel(config),
            local,
        }
    }

    /// Start the subscription loop in a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match self.run().await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(error) => {
                        warn!(
                            error = %error,
                            backoff_secs = backoff.as_secs(),
                            "fleet subscriber lost its connection, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        })
    }

    async fn run(&self) -> Result<()> {
        // Dedicated client: SUBSCRIBE takes the connection out of
        // request-response mode.
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| CacheError::tier("redis", format!("pub/sub client failed: {e}")))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::tier("redis", format!("pub/sub connection failed: {e}")))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| CacheError::tier("redis", format!("SUBSCRIBE failed: {e}")))?;

        info!(channel = %self.channel, "subscribed to fleet channel");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            match message.get_payload::<String>() {
                Ok(payload) => self.apply(&payload).await,
                Err(error) => {
                    warn!(error = %error, "fleet payload is not a string, skipping");
                }
            }
        }
        Err(CacheError::tier("redis", "fleet pub/sub stream ended"))
    }

    /// Apply one message to the local manager. Failures are logged and
    /// skipped so one bad message cannot wedge the subscription.
    async fn apply(&self, payload: &str) {
        let message: FleetMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(error) => {
                warn!(error = %error, payload = %payload, "unparseable fleet message, skipping");
                return;
            }
        };
        let outcome = match message {
            FleetMessage::Write(request) => {
                debug!(cache = %request.cache, "applying fleet write");
                self.local.write(request).await
            }
            FleetMessage::Evict(request) => {
                debug!(cache = %request.cache, "applying fleet eviction");
                self.local.evict(request).await
            }
        };
        if let Err(error) = outcome {
            warn!(error = %error, "failed to apply fleet mutation");
        }
    }
}
