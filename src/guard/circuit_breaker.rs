//! Per-endpoint circuit breaker.
//!
//! # States
//!
//! ```text
//!            failure_count >= failure_threshold
//!   Closed ───────────────────────────────────────► Open
//!     ▲                                             │  ▲
//!     │ success_threshold                           │  │ any failure
//!     │ consecutive successes     recovery_timeout  │  │
//!     │                           elapsed, on next  ▼  │
//!     └──────────────────────────────────────── HalfOpen
//!                                   allow()
//! ```
//!
//! The `Open → HalfOpen` transition is evaluated lazily inside
//! [`CircuitBreaker::allow`]; there is no background timer.
//!
//! # Concurrency
//!
//! Circuits live in a sharded [`DashMap`]. Every read-modify-write happens
//! while holding the entry's shard lock, so outcome updates for one key are
//! linearizable while unrelated keys on other shards proceed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::telemetry;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Endpoint assumed down, calls fail fast.
    Open,
    /// Probing whether the endpoint recovered.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name, as used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for the circuit breaker.
///
/// ```rust
/// # use heimdall::CircuitBreakerConfig;
/// # use std::time::Duration;
/// let config = CircuitBreakerConfig::new()
///     .failure_threshold(3)
///     .recovery_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a closed circuit. Default: 5.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before probing. Default: 60s.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes needed to close. Default: 3.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive failures that open a closed circuit.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set how long an open circuit waits before admitting probes.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Set the consecutive half-open successes that close the circuit.
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    /// Reject zero thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit breaker failure_threshold must be at least 1".into());
        }
        if self.success_threshold == 0 {
            return Err("circuit breaker success_threshold must be at least 1".into());
        }
        Ok(())
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub consecutive_half_open_successes: u32,
    /// Set only while `Open`.
    pub opened_at: Option<Instant>,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Circuit::default().snapshot()
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }
}

impl Circuit {
    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            consecutive_half_open_successes: self.half_open_successes,
            opened_at: self.opened_at,
        }
    }

    /// Move to `to`, maintaining the counter and `opened_at` invariants.
    fn transition(&mut self, key: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        self.half_open_successes = 0;
        match to {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.opened_at = None;
            }
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::HalfOpen => self.opened_at = None,
        }

        if to == CircuitState::Open {
            warn!(key, from = from.as_str(), "circuit opened");
        } else {
            info!(key, from = from.as_str(), to = to.as_str(), "circuit state changed");
        }
        metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
            "key" => key.to_owned(),
            "from" => from.as_str(),
            "to" => to.as_str(),
        )
        .increment(1);
    }
}

/// Circuit breaker keyed by endpoint.
///
/// Circuits are created lazily on first use of a key and live until
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: DashMap<String, Circuit>,
}

impl CircuitBreaker {
    /// Create a breaker with no circuits; each key starts closed.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: DashMap::new(),
        }
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call against `key` may proceed now.
    ///
    /// Performs the lazy `Open → HalfOpen` transition when the recovery
    /// timeout has elapsed.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut circuit = self.circuits.entry(key.to_owned()).or_default();
        let state = circuit.state;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let due = circuit
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.recovery_timeout);
                if due {
                    circuit.transition(key, CircuitState::HalfOpen, now);
                }
                due
            }
        }
    }

    /// Record the net success of a (possibly retried) call.
    pub fn record_success(&self, key: &str) {
        let now = self.clock.now();
        let mut circuit = self.circuits.entry(key.to_owned()).or_default();
        let state = circuit.state;
        match state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.success_threshold {
                    circuit.transition(key, CircuitState::Closed, now);
                }
            }
            // A straggler admitted before the trip; the open period stands.
            CircuitState::Open => {}
        }
    }

    /// Record the terminal failure of a (possibly retried) call.
    pub fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        let mut circuit = self.circuits.entry(key.to_owned()).or_default();
        let state = circuit.state;
        match state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                if circuit.failure_count >= self.config.failure_threshold {
                    circuit.transition(key, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => circuit.transition(key, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    /// Current state without triggering any transition.
    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits
            .get(key)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Full view of the circuit for `key`.
    pub fn snapshot(&self, key: &str) -> CircuitSnapshot {
        self.circuits
            .get(key)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Time left before an open circuit accepts a probe.
    ///
    /// `None` unless the circuit is open and still cooling down.
    pub fn retry_in(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let circuit = self.circuits.get(key)?;
        let opened_at = circuit.opened_at?;
        self.config
            .recovery_timeout
            .checked_sub(now.saturating_duration_since(opened_at))
            .filter(|left| !left.is_zero())
    }

    /// Forget everything about `key`; the next call sees a closed circuit.
    pub fn reset(&self, key: &str) {
        if self.circuits.remove(key).is_some() {
            info!(key, "circuit reset");
        }
    }

    /// Forget every circuit.
    pub fn reset_all(&self) {
        self.circuits.clear();
    }

    /// Keys with tracked circuit state.
    pub fn keys(&self) -> Vec<String> {
        self.circuits.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new().failure_threshold(threshold),
            Arc::new(clock.clone()),
        );
        (cb, clock)
    }

    #[test]
    fn unknown_key_is_closed() {
        let (cb, _) = breaker(3);
        assert_eq!(cb.state("nobody"), CircuitState::Closed);
        assert_eq!(cb.snapshot("nobody"), CircuitSnapshot::default());
        assert!(cb.keys().is_empty());
    }

    #[test]
    fn opened_at_tracks_open_state_only() {
        let (cb, clock) = breaker(1);
        cb.record_failure("k");
        assert!(cb.snapshot("k").opened_at.is_some());

        clock.advance(Duration::from_secs(60));
        assert!(cb.allow("k"));
        let snap = cb.snapshot("k");
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert!(snap.opened_at.is_none());
    }

    #[test]
    fn open_ignores_further_failures() {
        let (cb, _) = breaker(2);
        cb.record_failure("k");
        cb.record_failure("k");
        let opened = cb.snapshot("k");
        cb.record_failure("k");
        cb.record_failure("k");
        assert_eq!(cb.snapshot("k"), opened);
        assert_eq!(opened.failure_count, 2);
    }

    #[test]
    fn retry_in_counts_down() {
        let (cb, clock) = breaker(1);
        assert_eq!(cb.retry_in("k"), None);
        cb.record_failure("k");
        assert_eq!(cb.retry_in("k"), Some(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(45));
        assert_eq!(cb.retry_in("k"), Some(Duration::from_secs(15)));
        clock.advance(Duration::from_secs(15));
        assert_eq!(cb.retry_in("k"), None);
    }

    #[test]
    fn validate_rejects_zero_thresholds() {
        assert!(CircuitBreakerConfig::new().failure_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().success_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }
}
