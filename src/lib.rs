//! Heimdall - resilient executor for calls against unreliable remote endpoints
//!
//! This crate wraps outbound calls with four cooperating guards:
//!
//! - a per-endpoint **circuit breaker** that fails fast while an endpoint
//!   is down and probes it again after a recovery timeout,
//! - a **retry policy** with capped exponential backoff and jitter,
//! - a sliding-window **rate limiter** per endpoint,
//! - a **response cache** that collapses concurrent identical requests into
//!   a single upstream call.
//!
//! They are composed by the [`Executor`], which guarantees that a retried
//! call takes one rate-limit slot and records one breaker outcome, and that
//! a cached response bypasses every other guard.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use heimdall::{Call, Executor, HeimdallError, UpstreamError};
//!
//! async fn get_user(id: u32) -> Result<serde_json::Value, UpstreamError> {
//!     // perform the HTTP request here
//!     Ok(serde_json::json!({ "id": id }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let executor = Executor::builder()
//!         .failure_threshold(5)
//!         .max_retries(3)
//!         .max_requests_per_window(100)
//!         .default_ttl(Duration::from_secs(60))
//!         .build()?;
//!
//!     let call = Call::new("users-api").fingerprint(heimdall::fingerprint("GET", "/users/1", &[], None));
//!     match executor.execute(&call, || get_user(1)).await {
//!         Ok(user) => println!("{user}"),
//!         Err(e) if e.is_retry_later() => println!("degraded: {e}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! Every time-dependent decision goes through a [`clock::Clock`]. Inject a
//! [`clock::ManualClock`] with [`ExecutorBuilder::clock`] to drive breaker
//! recovery, rate windows, cache expiry and backoff without real sleeps.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod retry;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStats, ResponseCache, fingerprint};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{Config, ExecutorConfig};
pub use error::{HeimdallError, Result, UpstreamError};
pub use executor::{Call, Executor, ExecutorBuilder};
pub use guard::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
    RateLimitConfig, RateLimiter,
};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, StopReason};

// Re-export for consumers that pass cancellation tokens to `Call`
pub use tokio_util::sync::CancellationToken;
