//! Tests for [`ResponseCache`]: TTL + LRU store with in-flight deduplication.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use heimdall::clock::{MAX_HORIZON, ManualClock};
use heimdall::{CacheConfig, HeimdallError, ResponseCache};

fn new_cache<V: Clone + Send + Sync + 'static>(max_size: usize) -> (ResponseCache<V>, ManualClock) {
    let clock = ManualClock::new();
    let cache = ResponseCache::new(
        CacheConfig::new().max_size(max_size),
        Arc::new(clock.clone()),
    );
    (cache, clock)
}

const MINUTE: Duration = Duration::from_secs(60);

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_size, 100);
    assert_eq!(config.default_ttl, Duration::from_secs(300));
}

#[test]
fn cache_config_builder() {
    let config = CacheConfig::new()
        .max_size(500)
        .default_ttl(Duration::from_secs(60));
    assert_eq!(config.max_size, 500);
    assert_eq!(config.default_ttl, Duration::from_secs(60));
    assert!(CacheConfig::new().max_size(0).validate().is_err());
}

// =========================================================================
// Storage
// =========================================================================

#[test]
fn miss_then_hit() {
    let (cache, _) = new_cache::<String>(10);
    assert!(cache.get("GET:/a").is_none());

    cache.insert("GET:/a", "alpha".to_string(), MINUTE);
    assert_eq!(cache.get("GET:/a").as_deref(), Some("alpha"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn idempotent_reads_within_ttl() {
    let (cache, clock) = new_cache::<u32>(10);
    cache.insert("GET:/a", 1, MINUTE);

    for _ in 0..5 {
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("GET:/a"), Some(1));
    }
    clock.advance(Duration::from_secs(10));
    assert_eq!(cache.get("GET:/a"), None);
}

#[test]
fn least_recently_used_entry_is_evicted() {
    let (cache, _) = new_cache::<u32>(3);
    cache.insert("a", 1, MINUTE);
    cache.insert("b", 2, MINUTE);
    cache.insert("c", 3, MINUTE);

    // Touch "a" so "b" becomes the oldest.
    assert_eq!(cache.get("a"), Some(1));
    cache.insert("d", 4, MINUTE);

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.get("a"), Some(1));
    assert_eq!(cache.get("c"), Some(3));
    assert_eq!(cache.get("d"), Some(4));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn overwrite_does_not_evict() {
    let (cache, _) = new_cache::<u32>(2);
    cache.insert("a", 1, MINUTE);
    cache.insert("b", 2, MINUTE);
    cache.insert("a", 10, MINUTE);

    assert_eq!(cache.get("a"), Some(10));
    assert_eq!(cache.get("b"), Some(2));
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn invalidation() {
    let (cache, _) = new_cache::<u32>(10);
    cache.insert("GET:/users/1", 1, MINUTE);
    cache.insert("GET:/users/2", 2, MINUTE);
    cache.insert("GET:/orders/1", 3, MINUTE);

    assert!(cache.invalidate("GET:/users/1"));
    assert!(!cache.invalidate("GET:/users/1"));
    assert_eq!(cache.invalidate_matching("/users/").unwrap(), 1);
    assert_eq!(cache.get("GET:/orders/1"), Some(3));

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn invalid_pattern_is_configuration_error() {
    let (cache, _) = new_cache::<u32>(10);
    let err = cache.invalidate_matching("[unclosed").unwrap_err();
    assert!(matches!(err, HeimdallError::Configuration(_)));
}

// =========================================================================
// In-flight deduplication
// =========================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_computation() {
    let (cache, _) = new_cache::<serde_json::Value>(10);
    let calls = Arc::new(AtomicU32::new(0));

    let compute = |calls: Arc<AtomicU32>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, HeimdallError>(serde_json::json!({ "id": 1 }))
        }
    };

    let (a, b) = tokio::join!(
        cache.get_or_compute("GET:/users/1", MINUTE, compute(Arc::clone(&calls))),
        cache.get_or_compute("GET:/users/1", MINUTE, compute(Arc::clone(&calls))),
    );

    assert_eq!(a.unwrap(), serde_json::json!({ "id": 1 }));
    assert_eq!(b.unwrap(), serde_json::json!({ "id": 1 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.is_in_flight("GET:/users/1"));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn many_waiters_one_call() {
    let (cache, _) = new_cache::<u32>(10);
    let calls = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute("GET:/hot", MINUTE, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(99)
                })
                .await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 99);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().coalesced, 19);
}

#[tokio::test(start_paused = true)]
async fn failure_reaches_every_waiter_and_is_not_cached() {
    let (cache, _) = new_cache::<u32>(10);
    let calls = Arc::new(AtomicU32::new(0));

    let failing = |calls: Arc<AtomicU32>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<u32, _>(HeimdallError::Internal("upstream broke".into()))
        }
    };

    let (a, b) = tokio::join!(
        cache.get_or_compute("GET:/x", MINUTE, failing(Arc::clone(&calls))),
        cache.get_or_compute("GET:/x", MINUTE, failing(Arc::clone(&calls))),
    );
    assert!(matches!(a, Err(HeimdallError::Internal(_))));
    assert!(matches!(b, Err(HeimdallError::Internal(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
    assert!(!cache.is_in_flight("GET:/x"));

    // The next request starts a fresh call.
    let value = cache
        .get_or_compute("GET:/x", MINUTE, || async { Ok(5) })
        .await;
    assert_eq!(value.unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn dropped_leader_does_not_cancel_computation() {
    let (cache, _) = new_cache::<u32>(10);
    let calls = Arc::new(AtomicU32::new(0));

    let leader = {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            cache
                .get_or_compute("GET:/slow", MINUTE, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(3)
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.is_in_flight("GET:/slow"));
    leader.abort();

    let follower = cache
        .get_or_compute("GET:/slow", MINUTE, || async { Ok(0) })
        .await;
    assert_eq!(follower.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("GET:/slow"), Some(3));
}

#[tokio::test]
async fn zero_ttl_deduplicates_without_storing() {
    let (cache, _) = new_cache::<u32>(10);
    let value = cache
        .get_or_compute("GET:/live", Duration::ZERO, || async { Ok(1) })
        .await;
    assert_eq!(value.unwrap(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn hit_skips_computation() {
    let (cache, clock) = new_cache::<u32>(10);
    cache.insert("GET:/a", 1, MINUTE);

    let value = cache
        .get_or_compute("GET:/a", MINUTE, || async { Ok(0) })
        .await;
    assert_eq!(value.unwrap(), 1);
    assert_eq!(cache.stats().hits, 1);

    clock.advance(MINUTE);
    let value = cache.get_or_compute("GET:/a", MINUTE, || async { Ok(2) }).await;
    assert_eq!(value.unwrap(), 2);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test]
async fn unbounded_ttl_is_clamped() {
    let (cache, clock) = new_cache::<u32>(10);
    let value = cache
        .get_or_compute("GET:/forever", Duration::MAX, || async { Ok(5) })
        .await;
    assert_eq!(value.unwrap(), 5);

    let (stored, expires) = cache.entry_times("GET:/forever").unwrap();
    assert_eq!(expires - stored, MAX_HORIZON);

    cache.insert("GET:/also", 6, Duration::MAX);
    clock.advance(MINUTE * 60 * 24 * 365);
    assert_eq!(cache.get("GET:/forever"), Some(5));
    assert_eq!(cache.get("GET:/also"), Some(6));
}
