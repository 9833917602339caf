//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `key`: endpoint key the call was made against
//! - `status`: outcome: "ok" or an error label such as "circuit_open"
//! - `from` / `to`: circuit states on a transition

/// Terminal outcomes of `Executor::execute`.
///
/// Labels: `key`, `status`.
pub const REQUESTS_TOTAL: &str = "heimdall_requests_total";

/// End-to-end duration of `Executor::execute` in seconds, cache hits included.
///
/// Labels: `key`.
pub const REQUEST_DURATION_SECONDS: &str = "heimdall_request_duration_seconds";

/// Retry attempts scheduled (not counting the initial attempt).
///
/// Labels: `key`.
pub const RETRIES_TOTAL: &str = "heimdall_retries_total";

/// Calls rejected by the rate limiter.
///
/// Labels: `key`.
pub const RATE_LIMITED_TOTAL: &str = "heimdall_rate_limited_total";

/// Circuit breaker state transitions.
///
/// Labels: `key`, `from`, `to`.
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "heimdall_circuit_transitions_total";

/// Response cache hits.
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Response cache misses that started an upstream call.
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Callers that joined an in-flight upstream call instead of starting one.
pub const CACHE_COALESCED_TOTAL: &str = "heimdall_cache_coalesced_total";
