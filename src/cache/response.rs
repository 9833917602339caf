//! Response cache with in-flight deduplication.
//!
//! [`ResponseCache`] stores completed results keyed by request fingerprint
//! and collapses concurrent identical requests into a single upstream call.
//!
//! # Architecture
//!
//! ```text
//! get_or_compute(fp)
//!     │
//!     ├── valid entry?      ──► return clone            (hit)
//!     ├── in-flight entry?  ──► await shared future     (coalesced)
//!     └── otherwise         ──► spawn compute task,     (miss)
//!                               register shared future, await it
//!
//! compute task completes
//!     └── under the state lock: remove in-flight entry,
//!                               store value on success
//! ```
//!
//! The compute future runs as its own tokio task. Waiters only hold a
//! [`Shared`] handle to the task's result, so dropping or cancelling any
//! waiter (including the one that started the call) leaves the upstream call
//! and every other waiter untouched.
//!
//! Entries, the LRU order and the in-flight table sit behind one mutex that
//! is never held across an `.await`. That makes "check entry, check
//! in-flight, register in-flight" and "drop in-flight, store entry" each a
//! single atomic step, which is what guarantees at most one upstream call
//! per fingerprint.
//!
//! Expired entries are removed lazily when they are looked up.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, instant_after};
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Configuration for the response cache.
///
/// ```rust
/// # use heimdall::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_size(1_000)
///     .default_ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of stored entries. Default: 100.
    pub max_size: usize,
    /// TTL used when a call does not specify one. Default: 5 minutes.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of stored entries.
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    /// Set the TTL applied when a call does not carry its own.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Reject a zero capacity.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_size == 0 {
            return Err("cache max_size must be at least 1".into());
        }
        Ok(())
    }
}

/// Counters describing cache activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Stored entries, possibly including expired ones not yet looked up.
    pub entries: usize,
    /// Upstream calls currently in progress.
    pub in_flight: usize,
    pub hits: u64,
    /// Lookups that started an upstream call.
    pub misses: u64,
    /// Lookups that joined an existing upstream call.
    pub coalesced: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    expires_at: Instant,
    last_used: u64,
}

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Access tick → fingerprint; the first key is the least recently used.
    recency: BTreeMap<u64, String>,
    in_flight: HashMap<String, SharedResult<V>>,
    tick: u64,
    stats: CacheStats,
}

impl<V: Clone> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            in_flight: HashMap::new(),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Return a live entry, dropping it if it has expired.
    fn lookup(&mut self, fingerprint: &str, now: Instant) -> Option<V> {
        let expires_at = self.entries.get(fingerprint)?.expires_at;
        if now >= expires_at {
            self.remove(fingerprint);
            self.stats.expirations += 1;
            trace!(fingerprint, "cache entry expired");
            return None;
        }

        let tick = self.next_tick();
        let entry = self.entries.get_mut(fingerprint)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, fingerprint.to_owned());
        Some(entry.value.clone())
    }

    fn store(&mut self, fingerprint: &str, value: V, now: Instant, ttl: Duration, max_size: usize) {
        if self.remove(fingerprint).is_none() {
            while self.entries.len() >= max_size {
                let Some((_, evicted)) = self.recency.pop_first() else {
                    break;
                };
                self.entries.remove(&evicted);
                self.stats.evictions += 1;
                debug!(fingerprint = %evicted, "evicted least recently used entry");
            }
        }

        let tick = self.next_tick();
        self.recency.insert(tick, fingerprint.to_owned());
        self.entries.insert(
            fingerprint.to_owned(),
            CacheEntry {
                value,
                stored_at: now,
                expires_at: instant_after(now, ttl),
                last_used: tick,
            },
        );
    }

    fn remove(&mut self, fingerprint: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(fingerprint)?;
        self.recency.remove(&entry.last_used);
        Some(entry)
    }
}

struct CacheInner<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> CacheInner<V> {
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire the in-flight entry for `fingerprint`, storing a success.
    fn complete(&self, fingerprint: &str, ttl: Duration, result: &Result<V>) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.in_flight.remove(fingerprint);
        match result {
            Ok(value) if !ttl.is_zero() => {
                state.store(fingerprint, value.clone(), now, ttl, self.config.max_size);
            }
            Ok(_) => {}
            Err(e) => debug!(fingerprint, error = %e, "upstream call failed, nothing cached"),
        }
    }
}

/// In-memory TTL + LRU response cache with in-flight deduplication.
///
/// Cloning is cheap and clones share the same storage.
pub struct ResponseCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for ResponseCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new response cache with the given configuration.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                clock,
                state: Mutex::new(CacheState::new()),
            }),
        }
    }

    /// The cache's configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up a stored value.
    ///
    /// Returns `None` on a miss or when the entry has expired (the expired
    /// entry is removed). Does not count towards hit/miss statistics, which
    /// track [`get_or_compute`](Self::get_or_compute) only.
    pub fn get(&self, fingerprint: &str) -> Option<V> {
        let now = self.inner.clock.now();
        self.inner.lock().lookup(fingerprint, now)
    }

    /// Store a value directly, evicting the least recently used entry when
    /// full. A zero `ttl` stores nothing.
    pub fn insert(&self, fingerprint: &str, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = self.inner.clock.now();
        self.inner
            .lock()
            .store(fingerprint, value, now, ttl, self.inner.config.max_size);
    }

    /// Return the cached value, join an in-flight computation, or start one.
    ///
    /// `compute` runs at most once per fingerprint at a time, on a spawned
    /// tokio task; every concurrent caller receives a clone of its result.
    /// On success the value is cached for `ttl` (a zero `ttl` deduplicates
    /// without caching). On failure nothing is cached and every waiter gets
    /// the error.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, ttl: Duration, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let pending = {
            let now = self.inner.clock.now();
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if let Some(value) = state.lookup(fingerprint, now) {
                state.stats.hits += 1;
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                return Ok(value);
            }

            match state.in_flight.get(fingerprint).cloned() {
                Some(shared) => {
                    state.stats.coalesced += 1;
                    metrics::counter!(telemetry::CACHE_COALESCED_TOTAL).increment(1);
                    trace!(fingerprint, "joining in-flight call");
                    shared
                }
                None => {
                    state.stats.misses += 1;
                    metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                    let shared = self.spawn(fingerprint.to_owned(), ttl, compute);
                    state.in_flight.insert(fingerprint.to_owned(), shared.clone());
                    shared
                }
            }
        };
        pending.await
    }

    fn spawn<F, Fut>(&self, fingerprint: String, ttl: Duration, compute: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = AssertUnwindSafe(async move { compute().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!(fingerprint = %fingerprint, "response computation panicked");
                    Err(HeimdallError::Internal(
                        "response computation panicked".into(),
                    ))
                });
            inner.complete(&fingerprint, ttl, &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(HeimdallError::Internal(format!(
                    "response computation aborted: {e}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// Remove one stored entry. In-flight calls are not affected.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.inner.lock().remove(fingerprint).is_some()
    }

    /// Remove every stored entry whose fingerprint matches `pattern`
    /// (a regular expression). Returns the number of removed entries.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
        let re = Regex::new(pattern).map_err(|e| {
            HeimdallError::Configuration(format!("invalid invalidation pattern {pattern:?}: {e}"))
        })?;

        let mut state = self.inner.lock();
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|fp| re.is_match(fp))
            .cloned()
            .collect();
        for fp in &doomed {
            state.remove(fp);
        }
        debug!(pattern, removed = doomed.len(), "invalidated matching entries");
        Ok(doomed.len())
    }

    /// Drop every stored entry. In-flight calls are not affected.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Whether `fingerprint` has an upstream call in progress.
    pub fn is_in_flight(&self, fingerprint: &str) -> bool {
        self.inner.lock().in_flight.contains_key(fingerprint)
    }

    /// When the stored entry for `fingerprint` was produced and when it
    /// expires, if present.
    pub fn entry_times(&self, fingerprint: &str) -> Option<(Instant, Instant)> {
        self.inner
            .lock()
            .entries
            .get(fingerprint)
            .map(|e| (e.stored_at, e.expires_at))
    }

    /// Snapshot of the counters plus current occupancy.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            ..state.stats
        }
    }

    /// Number of stored entries (expired ones included until looked up).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
