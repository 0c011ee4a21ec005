//! Integration tests against a real Redis, covering the networked tier,
//! the distributed lock provider and fleet-wide invalidation.
//!
//! Container-backed tests are ignored by default; run them with
//! `cargo test -- --ignored` where a Docker daemon is available.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use uuid::Uuid;

use strata_cache::{
    fetch_with, Cache, CacheEvictRequest, CacheManager, CacheProvider, CacheWriteEntry,
    CacheWriteRequest, MemoryCacheProvider,
};
use strata_core::{
    CacheEntry, CacheProps, CachePropsOptions, FullKey, KeyPattern, Namespace, ResourceKey, Sector,
};
use strata_lock::{AdvisoryLock, AdvisoryLockProvider, LockOptions, LockService};
use strata_redis::{
    create_redis_pool, FleetCacheManager, FleetSubscriber, RedisCacheProvider, RedisConfig,
    RedisLockProvider,
};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");
            (container, url)
        })
        .await;
    url.clone()
}

/// Fresh config with a unique key prefix and deployment id, so tests
/// sharing the container never see each other's keys or messages.
async fn test_config() -> RedisConfig {
    RedisConfig {
        enabled: true,
        url: get_redis_url().await,
        pool_size: 5,
        timeout_ms: 5000,
        key_prefix: format!("test:{}:", Uuid::new_v4().simple()),
        deployment_id: Uuid::new_v4().simple().to_string(),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();
}

fn tier_props() -> CacheProps {
    CachePropsOptions::new()
        .time_to_live(Duration::from_secs(60))
        .time_to_stale(Duration::from_secs(30))
        .build()
        .unwrap()
}

fn full_key(namespace: &Namespace, key: &str) -> FullKey {
    FullKey::compose("users", namespace, &ResourceKey::new(key))
}

#[tokio::test]
async fn disabled_or_unreachable_redis_degrades_to_none() {
    init_logging();
    let disabled = RedisConfig::default();
    assert!(create_redis_pool(&disabled).await.is_none());

    let unreachable = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        timeout_ms: 500,
        ..RedisConfig::default()
    };
    assert!(create_redis_pool(&unreachable).await.is_none());
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn redis_tier_round_trips_and_drops_misses() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();
    let tier: RedisCacheProvider<String> =
        RedisCacheProvider::new("redis", tier_props(), pool, config.key_prefix.clone());

    let namespace = Namespace::of(["tenant"]);
    let present = full_key(&namespace, "42");
    let missing = full_key(&namespace, "43");

    tier.put_values(&[(present.clone(), Some(CacheEntry::of("alice".to_string())))])
        .await
        .unwrap();

    let found = tier
        .get_values(&[present.clone(), missing])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[&present].value, "alice");
    assert!(found[&present].live_until.is_some(), "tier policy must apply");

    // Tombstone deletes server-side.
    tier.put_values(&[(present.clone(), None)]).await.unwrap();
    let found = tier.get_values(&[present]).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn redis_tier_entries_expire_server_side() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();
    let props = CachePropsOptions::new()
        .time_to_live(Duration::from_millis(200))
        .build()
        .unwrap();
    let tier: RedisCacheProvider<String> =
        RedisCacheProvider::new("redis", props, pool, config.key_prefix.clone());

    let key = full_key(&Namespace::of(["tenant"]), "expiring");
    tier.put_values(&[(key.clone(), Some(CacheEntry::of("soon gone".to_string())))])
        .await
        .unwrap();
    assert_eq!(tier.get_values(&[key.clone()]).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(tier.get_values(&[key]).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn redis_tier_eviction_is_pattern_scoped() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();
    let tier: RedisCacheProvider<String> =
        RedisCacheProvider::new("redis", tier_props(), pool, config.key_prefix.clone());

    let tenant_a = full_key(&Namespace::of(["tenant-a"]), "1");
    let tenant_a_sub = full_key(&Namespace::of(["tenant-a", "sub"]), "1");
    let tenant_ab = full_key(&Namespace::of(["tenant-ab"]), "1");
    tier.put_values(&[
        (tenant_a.clone(), Some(CacheEntry::of("a".to_string()))),
        (tenant_a_sub.clone(), Some(CacheEntry::of("sub".to_string()))),
        (tenant_ab.clone(), Some(CacheEntry::of("ab".to_string()))),
    ])
    .await
    .unwrap();

    tier.remove_all(&KeyPattern::for_sector("users", &Sector::of(["tenant-a"])))
        .await
        .unwrap();

    let found = tier
        .get_values(&[tenant_a, tenant_a_sub, tenant_ab.clone()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains_key(&tenant_ab));
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn redis_locks_are_exclusive_until_the_lease_elapses() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();
    let provider = RedisLockProvider::new(pool, config.key_prefix.clone());

    let keys: Vec<String> = vec!["a".to_string(), "b".to_string()];
    let props = LockOptions::new()
        .duration(Duration::from_millis(300))
        .build();

    let held = provider.acquire(&keys, &props, "test").await.unwrap();
    assert!(held.is_some());

    // Overlap on "b" blocks the whole request.
    let overlap: Vec<String> = vec!["b".to_string(), "c".to_string()];
    assert!(provider.acquire(&overlap, &props, "test").await.unwrap().is_none());

    // Disjoint keys are free.
    let disjoint: Vec<String> = vec!["c".to_string()];
    assert!(provider.acquire(&disjoint, &props, "test").await.unwrap().is_some());

    // The lease expires without an explicit release.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(provider.acquire(&keys, &props, "test").await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn redis_lock_extension_and_release_are_ownership_checked() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();
    let provider = RedisLockProvider::new(pool, config.key_prefix.clone());

    let keys: Vec<String> = vec!["a".to_string(), "b".to_string()];
    let props = LockOptions::new().duration(Duration::from_secs(2)).build();

    let first = provider
        .acquire(&keys, &props, "test")
        .await
        .unwrap()
        .unwrap();
    let lock = AdvisoryLock::new(keys.clone(), props, first.clone());

    let renewed = provider.extend(&lock).await.unwrap().unwrap();
    assert_ne!(renewed.token(), first.token());

    // The superseded handle owns nothing anymore: extension fails and
    // release leaves the current holder in place.
    assert!(provider.extend(&lock).await.unwrap().is_none());
    provider.release(&lock).await.unwrap();
    provider.release(&lock).await.unwrap();
    assert!(provider.acquire(&keys, &props, "test").await.unwrap().is_none());

    // The live handle releases for real.
    let current = AdvisoryLock::new(keys.clone(), props, renewed);
    provider.release(&current).await.unwrap();
    assert!(provider.acquire(&keys, &props, "test").await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn processes_share_values_through_the_redis_tier() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();

    let build_cache = |pool: deadpool_redis::Pool, config: &RedisConfig| {
        Cache::<String>::builder("users")
            .tier(Arc::new(RedisCacheProvider::new(
                "redis",
                tier_props(),
                pool.clone(),
                config.key_prefix.clone(),
            )))
            .lock_service(LockService::new(Arc::new(RedisLockProvider::new(
                pool,
                config.key_prefix.clone(),
            ))))
            .build()
            .unwrap()
    };
    let process_one = build_cache(pool.clone(), &config);
    let process_two = build_cache(pool, &config);

    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = {
        let calls = Arc::clone(&calls);
        fetch_with(move |keys: Vec<ResourceKey>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(keys
                    .into_iter()
                    .map(|key| {
                        let value = format!("value:{key}");
                        (key, value)
                    })
                    .collect())
            }
        })
    };

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    let first = process_one
        .fetch_value(&namespace, &key, fetcher.clone())
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("value:42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The second process reads what the first one computed.
    let second = process_two
        .fetch_value(&namespace, &key, fetcher)
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("value:42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore = "needs a running Docker daemon"]
async fn fleet_mutations_converge_through_pubsub() {
    init_logging();
    let config = test_config().await;
    let pool = config.create_pool().unwrap();

    let cache: Cache<String> = Cache::builder("users")
        .tier(Arc::new(MemoryCacheProvider::new(
            "memory",
            CacheProps::standard(),
        )))
        .build()
        .unwrap();
    let manager = Arc::new(CacheManager::new());
    manager.register(Arc::new(cache.clone())).unwrap();

    let _listener = FleetSubscriber::new(&config, Arc::clone(&manager)).spawn();
    let fleet = FleetCacheManager::new(pool, &config, Arc::clone(&manager));

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    let write = CacheWriteRequest {
        cache: "users".to_string(),
        namespace: vec!["tenant".to_string()],
        entries: vec![CacheWriteEntry {
            key: "42".to_string(),
            value: Some(serde_json::json!("alice")),
        }],
    };

    // Publish until the loopback delivery lands; the subscriber may still
    // be connecting when the first message goes out.
    let mut applied = false;
    for _ in 0..50 {
        fleet.write(write.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = cache
            .get_cached_values(&namespace, std::slice::from_ref(&key), true)
            .await
            .unwrap();
        if !cached.is_empty() {
            assert_eq!(cached[0].1, "alice");
            applied = true;
            break;
        }
    }
    assert!(applied, "fleet write never reached the local manager");

    let evict = CacheEvictRequest {
        cache: "users".to_string(),
        sector: vec!["tenant".to_string()],
    };
    let mut evicted = false;
    for _ in 0..50 {
        fleet.evict(evict.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = cache
            .get_cached_values(&namespace, std::slice::from_ref(&key), true)
            .await
            .unwrap();
        if cached.is_empty() {
            evicted = true;
            break;
        }
    }
    assert!(evicted, "fleet eviction never reached the local manager");
}
