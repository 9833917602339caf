//! The resilient call executor.
//!
//! [`Executor`] composes the four collaborators around a caller-supplied
//! call function:
//!
//! ```text
//! execute(call, f)
//!     │
//!     ├── fingerprint? ──► ResponseCache::get_or_compute ──┐ hit / shared result
//!     │                         │ miss                      └──────────► return
//!     │                         ▼
//!     └───────────────► protected path
//!                           ├── RateLimiter::admit      rejected ─► RateLimited
//!                           ├── CircuitBreaker::allow   rejected ─► CircuitOpen
//!                           └── attempts 1..=max_retries+1
//!                                 ├── Ok  ─► record_success ─► return
//!                                 └── Err ─► RetryPolicy::should_retry
//!                                              ├── Retry ─► sleep (cancellable), next attempt
//!                                              └── Stop  ─► record_failure ─► terminal error
//! ```
//!
//! A retried call takes one rate-limit slot and records exactly one breaker
//! outcome, whatever the number of attempts. Admission rejections are never
//! retried and never count as breaker failures.

mod builder;
mod call;

pub use builder::ExecutorBuilder;
pub use call::Call;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, ResponseCache};
use crate::clock::{Clock, instant_after};
use crate::config::ExecutorConfig;
use crate::error::UpstreamError;
use crate::guard::{Admission, CircuitBreaker, CircuitSnapshot, CircuitState, RateLimiter};
use crate::retry::{RetryDecision, RetryPolicy, StopReason};
use crate::telemetry;
use crate::{HeimdallError, Result};

pub(crate) struct ExecutorInner<V> {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cache: ResponseCache<V>,
    clock: Arc<dyn Clock>,
}

/// Resilient executor for calls against remote endpoints.
///
/// Cloning is cheap; clones share breaker, limiter and cache state. Use one
/// executor per logical remote service.
///
/// ```rust,no_run
/// use heimdall::{Call, Executor, UpstreamError};
///
/// # async fn fetch_user() -> Result<String, UpstreamError> { Ok("{}".into()) }
/// #[tokio::main]
/// async fn main() -> heimdall::Result<()> {
///     let executor = Executor::<String>::builder()
///         .failure_threshold(3)
///         .max_retries(2)
///         .build()?;
///
///     let user = executor
///         .execute(&Call::new("users-api").fingerprint("GET:/users/1"), fetch_user)
///         .await?;
///     println!("{user}");
///     Ok(())
/// }
/// ```
pub struct Executor<V> {
    inner: Arc<ExecutorInner<V>>,
}

impl<V> Clone for Executor<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Executor<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new builder for configuring the executor.
    pub fn builder() -> ExecutorBuilder<V> {
        ExecutorBuilder::new()
    }

    /// Executor with the given configuration on the tokio clock.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Run `f` under caching, rate limiting, circuit breaking and retry.
    ///
    /// `f` is invoked once per attempt. With a fingerprint, concurrent
    /// identical calls share a single protected run and a valid cached value
    /// is returned without touching any guard. The shared run uses the
    /// deadline of the call that started it.
    ///
    /// # Errors
    ///
    /// - [`HeimdallError::RateLimited`] / [`HeimdallError::CircuitOpen`]
    ///   when admission is refused (never retried).
    /// - [`HeimdallError::Upstream`] for a failure the classifier deems
    ///   permanent.
    /// - [`HeimdallError::RetriesExhausted`] when every attempt failed.
    /// - [`HeimdallError::DeadlineExceeded`] when the next backoff would
    ///   overrun the call's deadline.
    /// - [`HeimdallError::Cancelled`] when the call's token fires while
    ///   waiting. An in-flight upstream call shared with other callers keeps
    ///   running.
    pub async fn execute<F, Fut>(&self, call: &Call, f: F) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, UpstreamError>> + Send + 'static,
    {
        let started = self.inner.clock.now();
        let cancel = call.cancel.as_ref();

        let result = if cancel.is_some_and(CancellationToken::is_cancelled) {
            Err(HeimdallError::Cancelled)
        } else {
            match call.cache_key() {
                Some(fingerprint) => {
                    let ttl = call.ttl.unwrap_or(self.inner.cache.config().default_ttl);
                    let inner = Arc::clone(&self.inner);
                    let key = call.key.clone();
                    let deadline = call.deadline;
                    // The shared run outlives any single waiter, so it gets
                    // no cancellation token of its own.
                    let shared = self.inner.cache.get_or_compute(fingerprint, ttl, move || async move {
                        inner.protected(&key, deadline, None, &f).await
                    });
                    cancellable(cancel, shared).await
                }
                None => {
                    self.inner
                        .protected(&call.key, call.deadline, cancel, &f)
                        .await
                }
            }
        };

        self.inner.record_outcome(&call.key, started, &result);
        result
    }

    /// Current circuit state for `key`. Never triggers a transition.
    pub fn state(&self, key: &str) -> CircuitState {
        self.inner.breaker.state(key)
    }

    /// Full circuit view for `key`.
    pub fn circuit(&self, key: &str) -> CircuitSnapshot {
        self.inner.breaker.snapshot(key)
    }

    /// Hit, miss and occupancy counters of the response cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Force the circuit for `key` back to closed with clean counters.
    pub fn reset_circuit(&self, key: &str) {
        self.inner.breaker.reset(key);
    }

    /// Drop the cached response for `fingerprint`.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.inner.cache.invalidate(fingerprint)
    }

    /// Drop every cached response whose fingerprint matches `pattern`.
    pub fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
        self.inner.cache.invalidate_matching(pattern)
    }

    /// Feed an upstream `Retry-After` value (in seconds) for `key`; calls
    /// are rejected locally until it has passed.
    pub fn record_retry_after(&self, key: &str, retry_after_seconds: u64) {
        self.inner
            .limiter
            .block_for(key, Duration::from_secs(retry_after_seconds));
    }

    /// The per-key circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// The per-key rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Retry policy applied to every attempt.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// The response cache shared by fingerprinted calls.
    pub fn cache(&self) -> &ResponseCache<V> {
        &self.inner.cache
    }

    /// Time source driving every guard.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}

impl<V> ExecutorInner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Admission, attempts and breaker bookkeeping for one logical call.
    #[instrument(name = "heimdall.call", skip_all, fields(key = %key))]
    async fn protected<F, Fut>(
        &self,
        key: &str,
        deadline: Option<Duration>,
        cancel: Option<&CancellationToken>,
        f: &F,
    ) -> Result<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<V, UpstreamError>>,
    {
        if let Admission::Rejected { retry_after } = self.limiter.admit(key) {
            return Err(HeimdallError::RateLimited {
                key: key.to_owned(),
                retry_after: Some(retry_after),
            });
        }

        if !self.breaker.allow(key) {
            debug!(key, "circuit open, failing fast");
            return Err(HeimdallError::CircuitOpen {
                key: key.to_owned(),
                retry_in: self.breaker.retry_in(key),
            });
        }

        let deadline_at = deadline.map(|d| instant_after(self.clock.now(), d));
        let mut attempt = 1;

        loop {
            let error = match f().await {
                Ok(value) => {
                    self.breaker.record_success(key);
                    return Ok(value);
                }
                Err(e) => e,
            };

            if error.is_throttled() {
                if let Some(hint) = error.retry_after() {
                    self.limiter.block_for(key, hint);
                }
            }

            let delay = match self.retry.should_retry(attempt, &error) {
                RetryDecision::Retry { delay } => delay,
                RetryDecision::Stop(reason) => {
                    self.breaker.record_failure(key);
                    return Err(match reason {
                        StopReason::NotRetryable => HeimdallError::Upstream(error),
                        StopReason::Exhausted => HeimdallError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        },
                    });
                }
            };

            if deadline_at.is_some_and(|at| instant_after(self.clock.now(), delay) >= at) {
                warn!(key, attempt, error = %error, "deadline reached, giving up");
                self.breaker.record_failure(key);
                return Err(HeimdallError::DeadlineExceeded {
                    attempts: attempt,
                    last: Some(error),
                });
            }

            warn!(
                key,
                attempt,
                max_retries = self.retry.config().max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after transient error"
            );
            metrics::counter!(telemetry::RETRIES_TOTAL, "key" => key.to_owned()).increment(1);

            cancellable(cancel, async {
                self.clock.sleep(delay).await;
                Ok(())
            })
            .await?;
            attempt += 1;
        }
    }

    fn record_outcome(&self, key: &str, started: Instant, result: &Result<V>) {
        let status = match result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        let elapsed = self.clock.now().saturating_duration_since(started);
        metrics::counter!(
            telemetry::REQUESTS_TOTAL,
            "key" => key.to_owned(),
            "status" => status
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS, "key" => key.to_owned())
            .record(elapsed.as_secs_f64());
    }
}

/// Race `fut` against `token`, preferring cancellation when both are ready.
async fn cancellable<T>(
    token: Option<&CancellationToken>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(HeimdallError::Cancelled),
            result = fut => result,
        },
        None => fut.await,
    }
}
