//! End-to-end behavior of the tiered cache: read-through with promotion,
//! write-through with tombstones, dogpile avoidance, stale-while-revalidate
//! and sector eviction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strata_cache::{fetch_with, Cache, CacheProvider, Fetcher, MemoryCacheProvider};
use strata_core::error::CacheError;
use strata_core::{CacheEntry, CacheProps, CachePropsOptions, FullKey, Namespace, ResourceKey, Sector};
use strata_lock::{
    AdvisoryLock, AdvisoryLockProvider, LockError, LockOptions, LockProps, LockService,
    ProviderLock,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();
}

fn resource_keys(raw: &[&str]) -> Vec<ResourceKey> {
    raw.iter().map(|k| ResourceKey::new(*k)).collect()
}

fn counting_fetcher(calls: &Arc<AtomicU32>) -> Arc<dyn Fetcher<String>> {
    let calls = Arc::clone(calls);
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
}

/// Returns "v1" on the first call, "v2" on the second, and so on.
fn versioned_fetcher(calls: &Arc<AtomicU32>) -> Arc<dyn Fetcher<String>> {
    let calls = Arc::clone(calls);
    fetch_with(move |keys: Vec<ResourceKey>| {
        let calls = Arc::clone(&calls);
        async move {
            let version = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(keys
                .into_iter()
                .map(|key| (key, format!("v{version}")))
                .collect())
        }
    })
}

fn memory_tier(name: &str) -> Arc<MemoryCacheProvider<String>> {
    Arc::new(MemoryCacheProvider::new(name, CacheProps::standard()))
}

struct FailingLockProvider;

#[async_trait]
impl AdvisoryLockProvider for FailingLockProvider {
    async fn acquire(
        &self,
        _resource_keys: &[String],
        _props: &LockProps,
        _context: &str,
    ) -> Result<Option<ProviderLock>, LockError> {
        Err(LockError::provider("lock backend unavailable"))
    }

    async fn extend(&self, _lock: &AdvisoryLock) -> Result<Option<ProviderLock>, LockError> {
        Err(LockError::provider("lock backend unavailable"))
    }

    async fn release(&self, _lock: &AdvisoryLock) -> Result<(), LockError> {
        Err(LockError::provider("lock backend unavailable"))
    }
}

#[tokio::test]
async fn miss_fetches_once_and_fills_every_tier() {
    init_logging();
    let l1 = memory_tier("l1");
    let l2 = memory_tier("l2");
    let cache: Cache<String> = Cache::builder("users")
        .tier(l1.clone())
        .tier(l2.clone())
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(&calls);

    let value = cache
        .fetch_value(&namespace, &ResourceKey::new("42"), fetcher.clone())
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("value:42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let full = FullKey::compose("users", &namespace, &ResourceKey::new("42"));
    assert!(l1.get_values(&[full.clone()]).await.unwrap().contains_key(&full));
    assert!(l2.get_values(&[full.clone()]).await.unwrap().contains_key(&full));

    // Second read is served from cache.
    let again = cache
        .fetch_value(&namespace, &ResourceKey::new("42"), fetcher)
        .await
        .unwrap();
    assert_eq!(again.as_deref(), Some("value:42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lower_tier_hits_promote_into_higher_tiers() {
    init_logging();
    let l1 = memory_tier("l1");
    let l2 = memory_tier("l2");
    let cache: Cache<String> = Cache::builder("users")
        .tier(l1.clone())
        .tier(l2.clone())
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    let full = FullKey::compose("users", &namespace, &key);
    l2.put_values(&[(full.clone(), Some(CacheEntry::of("from-l2".to_string())))])
        .await
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let value = cache
        .fetch_value(&namespace, &key, counting_fetcher(&calls))
        .await
        .unwrap();

    assert_eq!(value.as_deref(), Some("from-l2"));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "hit must not fetch");
    assert!(
        l1.get_values(&[full.clone()]).await.unwrap().contains_key(&full),
        "hit must be promoted into the higher tier"
    );
}

#[tokio::test]
async fn concurrent_misses_trigger_a_single_fetch() {
    init_logging();
    let cache: Cache<String> = Cache::builder("users")
        .tier(memory_tier("memory"))
        .lock_options(
            LockOptions::new()
                .retry_attempts(10)
                .retry_delay(Duration::from_millis(50)),
        )
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("hot");
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = {
        let calls = Arc::clone(&calls);
        fetch_with(move |keys: Vec<ResourceKey>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Slow enough that every concurrent caller sees the miss.
                tokio::time::sleep(Duration::from_millis(25)).await;
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

    let fetches: Vec<_> = (0..8)
        .map(|_| cache.fetch_value(&namespace, &key, fetcher.clone()))
        .collect();
    let results = futures_util::future::join_all(fetches).await;

    for result in results {
        assert_eq!(result.unwrap().as_deref(), Some("value:hot"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "dogpile fetched more than once");
}

#[tokio::test]
async fn broken_lock_backend_degrades_to_direct_fetches() {
    init_logging();
    let cache: Cache<String> = Cache::builder("users")
        .tier(memory_tier("memory"))
        .lock_service(LockService::new(Arc::new(FailingLockProvider)))
        .lock_options(
            LockOptions::new()
                .retry_attempts(2)
                .retry_delay(Duration::from_millis(1)),
        )
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(&calls);

    let values = cache
        .fetch_values(&namespace, &resource_keys(&["a", "b"]), fetcher.clone())
        .await
        .unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0], (ResourceKey::new("a"), "value:a".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The result still landed in the cache despite the dead lock backend.
    let again = cache
        .fetch_values(&namespace, &resource_keys(&["a", "b"]), fetcher)
        .await
        .unwrap();
    assert_eq!(again.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_values_serve_immediately_and_refresh_in_background() {
    init_logging();
    let props = CachePropsOptions::new()
        .time_to_live(Duration::from_secs(10))
        .time_to_stale(Duration::from_millis(100))
        .build()
        .unwrap();
    let cache: Cache<String> = Cache::builder("users")
        .tier(Arc::new(MemoryCacheProvider::new("memory", props)))
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = versioned_fetcher(&calls);

    let first = cache.fetch_value(&namespace, &key, fetcher.clone()).await.unwrap();
    assert_eq!(first.as_deref(), Some("v1"));

    tokio::time::sleep(Duration::from_millis(150)).await;

    // Stale now: the old value comes back immediately.
    let stale = cache.fetch_value(&namespace, &key, fetcher.clone()).await.unwrap();
    assert_eq!(stale.as_deref(), Some("v1"));

    // The background refresher recomputes and rewrites.
    let mut refreshed = false;
    for _ in 0..200 {
        if calls.load(Ordering::SeqCst) >= 2 {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refreshed, "background revalidation never fetched");

    let mut current = None;
    for _ in 0..200 {
        let cached = cache
            .get_cached_values(&namespace, std::slice::from_ref(&key), true)
            .await
            .unwrap();
        if let Some((_, value)) = cached.first() {
            if value == "v2" {
                current = Some(value.clone());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(current.as_deref(), Some("v2"));
}

#[tokio::test]
async fn dead_values_recompute_synchronously() {
    init_logging();
    let props = CachePropsOptions::new()
        .time_to_live(Duration::from_millis(100))
        .time_to_stale(Duration::from_millis(50))
        .build()
        .unwrap();
    let cache: Cache<String> = Cache::builder("users")
        .tier(Arc::new(MemoryCacheProvider::new("memory", props)))
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = versioned_fetcher(&calls);

    let first = cache.fetch_value(&namespace, &key, fetcher.clone()).await.unwrap();
    assert_eq!(first.as_deref(), Some("v1"));

    tokio::time::sleep(Duration::from_millis(150)).await;

    // Past the dead horizon there is nothing to serve, so this blocks on a
    // fresh fetch.
    let second = cache.fetch_value(&namespace, &key, fetcher).await.unwrap();
    assert_eq!(second.as_deref(), Some("v2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sector_eviction_is_segment_aligned() {
    init_logging();
    let cache: Cache<String> = Cache::builder("users")
        .tier(memory_tier("memory"))
        .build()
        .unwrap();

    let tenant_a = Namespace::of(["tenant-a"]);
    let tenant_a_sub = Namespace::of(["tenant-a", "sub"]);
    let tenant_ab = Namespace::of(["tenant-ab"]);
    let key = ResourceKey::new("1");

    for namespace in [&tenant_a, &tenant_a_sub, &tenant_ab] {
        cache
            .write_value(namespace, &key, Some("cached".to_string()))
            .await
            .unwrap();
    }

    cache.evict_all(&Sector::of(["tenant-a"])).await.unwrap();

    let gone = cache
        .get_cached_values(&tenant_a, std::slice::from_ref(&key), true)
        .await
        .unwrap();
    let gone_nested = cache
        .get_cached_values(&tenant_a_sub, std::slice::from_ref(&key), true)
        .await
        .unwrap();
    let kept = cache
        .get_cached_values(&tenant_ab, std::slice::from_ref(&key), true)
        .await
        .unwrap();

    assert!(gone.is_empty(), "sector keys must be evicted");
    assert!(gone_nested.is_empty(), "nested namespaces belong to the sector");
    assert_eq!(kept.len(), 1, "a sibling prefix must survive");
}

#[tokio::test]
async fn disabled_namespace_bypasses_every_tier() {
    init_logging();
    let tier = memory_tier("memory");
    let cache: Cache<String> = Cache::builder("users")
        .tier(tier.clone())
        .build()
        .unwrap();

    let namespace = Namespace::disabled();
    let key = ResourceKey::new("42");
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = counting_fetcher(&calls);

    // Every fetch goes to the source.
    cache.fetch_value(&namespace, &key, fetcher.clone()).await.unwrap();
    cache.fetch_value(&namespace, &key, fetcher).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Writes are dropped.
    cache
        .write_value(&namespace, &key, Some("ignored".to_string()))
        .await
        .unwrap();
    assert!(tier.is_empty(), "disabled namespace must not store anything");
}

#[tokio::test]
async fn tombstones_delete_from_every_tier() {
    init_logging();
    let l1 = memory_tier("l1");
    let l2 = memory_tier("l2");
    let cache: Cache<String> = Cache::builder("users")
        .tier(l1.clone())
        .tier(l2.clone())
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    cache
        .write_value(&namespace, &key, Some("cached".to_string()))
        .await
        .unwrap();
    assert_eq!(l1.len(), 1);
    assert_eq!(l2.len(), 1);

    cache.write_value(&namespace, &key, None).await.unwrap();
    assert!(l1.is_empty());
    assert!(l2.is_empty());
}

#[tokio::test]
async fn tiers_apply_their_own_policies_on_write() {
    init_logging();
    let tight = CachePropsOptions::new()
        .time_to_live(Duration::from_secs(60))
        .build()
        .unwrap();
    let loose = CachePropsOptions::new()
        .time_to_live(Duration::from_secs(3600))
        .build()
        .unwrap();
    let l1 = Arc::new(MemoryCacheProvider::new("l1", tight));
    let l2 = Arc::new(MemoryCacheProvider::new("l2", loose));
    let cache: Cache<String> = Cache::builder("users")
        .tier(l1.clone())
        .tier(l2.clone())
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    let key = ResourceKey::new("42");
    cache
        .write_value(&namespace, &key, Some("cached".to_string()))
        .await
        .unwrap();

    let full = FullKey::compose("users", &namespace, &key);
    let in_l1 = l1.get_values(&[full.clone()]).await.unwrap();
    let in_l2 = l2.get_values(&[full.clone()]).await.unwrap();
    assert!(in_l1[&full].live_until.unwrap() < in_l2[&full].live_until.unwrap());
}

#[tokio::test]
async fn unproduced_keys_are_absent_and_order_is_preserved() {
    init_logging();
    let cache: Cache<String> = Cache::builder("users")
        .tier(memory_tier("memory"))
        .build()
        .unwrap();

    let namespace = Namespace::of(["tenant"]);
    // The source only knows "b" and "c" and volunteers an unrequested "x".
    let fetcher = fetch_with(|keys: Vec<ResourceKey>| async move {
        let mut produced: Vec<(ResourceKey, String)> = keys
            .into_iter()
            .filter(|key| key.as_str() != "a")
            .map(|key| {
                let value = format!("value:{key}");
                (key, value)
            })
            .collect();
        produced.push((ResourceKey::new("x"), "stray".to_string()));
        Ok(produced)
    });

    let values = cache
        .fetch_values(&namespace, &resource_keys(&["c", "a", "b"]), fetcher)
        .await
        .unwrap();

    let keys: Vec<&str> = values.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, vec!["c", "b"], "input order minus unproduced keys");
}

#[tokio::test]
async fn fetch_errors_propagate() {
    init_logging();
    let cache: Cache<String> = Cache::builder("users")
        .tier(memory_tier("memory"))
        .build()
        .unwrap();

    let fetcher = fetch_with(|_keys: Vec<ResourceKey>| async move {
        Err::<Vec<(ResourceKey, String)>, _>(CacheError::fetch("source of truth is down"))
    });

    let err = cache
        .fetch_value(&Namespace::root(), &ResourceKey::new("42"), fetcher)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Fetch { .. }));
}
