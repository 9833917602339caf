//! Retry configuration and the retry decision function.
//!
//! [`RetryPolicy`] is pure: given the attempt number and the failure it
//! decides whether to try again and how long to wait. Sleeping, deadline
//! enforcement and breaker bookkeeping live in the
//! [`Executor`](crate::Executor), which keeps the policy trivially
//! unit-testable.
//!
//! # Backoff
//!
//! ```text
//! delay(n) = min(base_delay * 2^(n-1) + jitter, max_delay)   jitter ~ U[0, jitter_span]
//! ```
//!
//! An upstream `Retry-After` hint replaces the computed backoff (still
//! capped at `max_delay`).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::UpstreamError;

/// Predicate deciding whether an upstream failure is worth retrying.
pub type RetryClassifier = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use heimdall::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter_span(Duration::ZERO);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on any single delay. Default: 30s.
    pub max_delay: Duration,
    /// Width of the uniform jitter added to each delay. Default: 1s.
    pub jitter_span: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_span: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the first attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter span. `Duration::ZERO` disables jitter.
    pub fn jitter_span(mut self, span: Duration) -> Self {
        self.jitter_span = span;
        self
    }

    /// Check the config for values the policy cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay > self.max_delay {
            return Err(format!(
                "retry base_delay ({:?}) exceeds max_delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        Ok(())
    }
}

/// Why the policy declined to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The classifier rejected the error.
    NotRetryable,
    /// `max_retries` has been used up.
    Exhausted,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop(StopReason),
}

impl RetryDecision {
    /// Whether another attempt should follow.
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Retry decision function: config plus error classifier.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    classifier: RetryClassifier,
}

impl RetryPolicy {
    /// Policy using [`UpstreamError::is_retryable`] as the classifier.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(UpstreamError::is_retryable),
        }
    }

    /// Replace the error classifier.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&UpstreamError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub(crate) fn with_shared_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The policy's configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether the classifier considers `error` transient.
    pub fn is_retryable(&self, error: &UpstreamError) -> bool {
        (self.classifier)(error)
    }

    /// Decide what to do after attempt `attempt` (1-based) failed with `error`.
    pub fn should_retry(&self, attempt: u32, error: &UpstreamError) -> RetryDecision {
        if !self.is_retryable(error) {
            return RetryDecision::Stop(StopReason::NotRetryable);
        }
        if attempt > self.config.max_retries {
            return RetryDecision::Stop(StopReason::Exhausted);
        }
        let delay = match error.retry_after() {
            Some(hint) => hint.min(self.config.max_delay),
            None => self.delay_for(attempt),
        };
        RetryDecision::Retry { delay }
    }

    /// Backoff for `attempt` with a freshly drawn jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let span = self.config.jitter_span.as_millis() as u64;
        let jitter = if span > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=span))
        } else {
            Duration::ZERO
        };
        self.backoff(attempt, jitter)
    }

    /// Backoff for `attempt` (1-based) with an explicit jitter.
    ///
    /// `min(base_delay * 2^(attempt-1) + jitter, max_delay)`, saturating
    /// instead of overflowing for large attempt numbers.
    pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .config
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .saturating_add(jitter);
        delay.min(self.config.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
