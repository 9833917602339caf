//! Builder for configuring executor instances

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::{Executor, ExecutorInner};
use crate::cache::{CacheConfig, ResponseCache};
use crate::clock::{Clock, TokioClock};
use crate::config::ExecutorConfig;
use crate::error::UpstreamError;
use crate::guard::{CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter};
use crate::retry::{RetryClassifier, RetryConfig, RetryPolicy};
use crate::Result;

/// Builder for configuring executor instances.
///
/// Every setting has a default; `Executor::<V>::builder().build()` yields a
/// working executor on the tokio clock.
pub struct ExecutorBuilder<V> {
    config: ExecutorConfig,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<RetryClassifier>,
    _value: PhantomData<fn() -> V>,
}

impl<V> ExecutorBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            clock: None,
            classifier: None,
            _value: PhantomData,
        }
    }

    /// Replace the whole configuration at once.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the circuit breaker section.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Replace the retry section.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Replace the rate limit section.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Replace the cache section.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = config;
        self
    }

    /// Consecutive failures that open a circuit.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.config.circuit_breaker.failure_threshold = n;
        self
    }

    /// Time an open circuit waits before probing.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.circuit_breaker.recovery_timeout = timeout;
        self
    }

    /// Half-open successes needed to close.
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.config.circuit_breaker.success_threshold = n;
        self
    }

    /// Retries after the first attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    /// Backoff before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    /// Upper bound on any single backoff.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    /// Maximum random jitter added to backoff.
    pub fn jitter_span(mut self, span: Duration) -> Self {
        self.config.retry.jitter_span = span;
        self
    }

    /// Calls admitted per key and window.
    pub fn max_requests_per_window(mut self, n: usize) -> Self {
        self.config.rate_limit.max_requests = n;
        self
    }

    /// Length of the sliding rate window.
    pub fn window_duration(mut self, window: Duration) -> Self {
        self.config.rate_limit.window = window;
        self
    }

    /// Maximum stored responses.
    pub fn cache_max_size(mut self, n: usize) -> Self {
        self.config.cache.max_size = n;
        self
    }

    /// TTL for calls without their own.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.default_ttl = ttl;
        self
    }

    /// Time source for every collaborator. Defaults to [`TokioClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Decide which upstream failures are worth retrying.
    ///
    /// Defaults to [`UpstreamError::is_retryable`].
    pub fn retry_classifier(
        mut self,
        classifier: impl Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Build the executor.
    ///
    /// # Errors
    ///
    /// Returns [`HeimdallError::Configuration`](crate::HeimdallError::Configuration)
    /// when any part of the configuration is invalid.
    pub fn build(self) -> Result<Executor<V>> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(TokioClock),
        };
        let ExecutorConfig {
            circuit_breaker,
            retry,
            rate_limit,
            cache,
        } = self.config;

        let mut retry = RetryPolicy::new(retry);
        if let Some(classifier) = self.classifier {
            retry = retry.with_shared_classifier(classifier);
        }

        Ok(Executor {
            inner: Arc::new(ExecutorInner {
                breaker: CircuitBreaker::new(circuit_breaker, Arc::clone(&clock)),
                limiter: RateLimiter::new(rate_limit, Arc::clone(&clock)),
                cache: ResponseCache::new(cache, Arc::clone(&clock)),
                retry,
                clock,
            }),
        })
    }
}

impl<V> Default for ExecutorBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
