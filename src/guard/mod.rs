//! Admission guards evaluated before an upstream call.
//!
//! - [`RateLimiter`]: local admission control; a rejection is never an
//!   upstream failure and never touches the breaker.
//! - [`CircuitBreaker`]: fault isolation driven by upstream outcomes.
//!
//! Both partition their state by endpoint key in a sharded map, so guards
//! for unrelated keys never contend on a single lock.

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};
