//! Sliding-window rate limiter.
//!
//! Each endpoint key owns a window of admission timestamps. On every
//! acquisition the window is pruned to the trailing `window` duration and
//! the call is admitted only while fewer than `max_requests` timestamps
//! remain. Rejections leave the window untouched.
//!
//! On top of the window sits an optional block: after an upstream 429 with
//! a `Retry-After` hint, [`RateLimiter::block_for`] makes every acquisition
//! for that key fail until the hint has passed, regardless of window
//! capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::clock::{Clock, instant_after};
use crate::telemetry;

/// Configuration for the rate limiter.
///
/// ```rust
/// # use heimdall::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .max_requests(20)
///     .window(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Calls admitted per key within one window. Default: 100.
    pub max_requests: usize,
    /// Length of the trailing window. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Create a config with the default window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the calls admitted per key within one window.
    pub fn max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the sliding window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Reject a zero limit or an empty window.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("rate limit max_requests must be at least 1".into());
        }
        if self.window.is_zero() {
            return Err("rate limit window must be non-zero".into());
        }
        Ok(())
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Rejected; `retry_after` is when capacity is expected back.
    Rejected { retry_after: Duration },
}

impl Admission {
    /// Whether the call may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) > window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.blocked_until.is_some_and(|until| now >= until) {
            self.blocked_until = None;
        }
    }
}

/// Per-key sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    /// Create a limiter with empty windows.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one call against `key`.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.admit(key).is_admitted()
    }

    /// Like [`try_acquire`](Self::try_acquire) but reports when to come back.
    pub fn admit(&self, key: &str) -> Admission {
        let now = self.clock.now();
        let mut window = self.windows.entry(key.to_owned()).or_default();
        window.prune(now, self.config.window);

        if let Some(until) = window.blocked_until {
            let retry_after = until.saturating_duration_since(now);
            return self.reject(key, retry_after);
        }

        if window.calls.len() < self.config.max_requests {
            window.calls.push_back(now);
            return Admission::Admitted;
        }

        let retry_after = window
            .calls
            .front()
            .map(|&oldest| {
                instant_after(oldest, self.config.window).saturating_duration_since(now)
                    + Duration::from_millis(1)
            })
            .unwrap_or_default();
        self.reject(key, retry_after)
    }

    fn reject(&self, key: &str, retry_after: Duration) -> Admission {
        debug!(key, retry_after_ms = retry_after.as_millis() as u64, "rate limited");
        metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "key" => key.to_owned()).increment(1);
        Admission::Rejected { retry_after }
    }

    /// Reject every call for `key` until `until`.
    ///
    /// An existing later block is kept.
    pub fn block_until(&self, key: &str, until: Instant) {
        let mut window = self.windows.entry(key.to_owned()).or_default();
        if window.blocked_until.is_none_or(|current| current < until) {
            window.blocked_until = Some(until);
            debug!(key, "blocking until upstream retry-after passes");
        }
    }

    /// Reject every call for `key` for the next `duration`.
    pub fn block_for(&self, key: &str, duration: Duration) {
        self.block_until(key, instant_after(self.clock.now(), duration));
    }

    /// Remaining block time for `key`, if blocked.
    pub fn blocked_for(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let window = self.windows.get(key)?;
        window
            .blocked_until
            .map(|until| until.saturating_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    /// Calls admitted for `key` within the current window.
    pub fn in_window(&self, key: &str) -> usize {
        let now = self.clock.now();
        match self.windows.get_mut(key) {
            Some(mut window) => {
                window.prune(now, self.config.window);
                window.calls.len()
            }
            None => 0,
        }
    }

    /// Drop the window and any block for `key`.
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }
}
