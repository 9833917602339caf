//! Heimdall error types
//!
//! Two layers: [`UpstreamError`] describes what the injected call function
//! reported, [`HeimdallError`] is what [`Executor::execute`](crate::Executor::execute)
//! hands back to the caller. Both are `Clone` so a single in-flight failure
//! can be delivered to every waiter sharing it.

use std::time::Duration;

/// Status codes treated as transient by the default retry classifier.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Failure reported by the caller-supplied call function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Connection-level failure (reset, refused, DNS, ...).
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote answered with a failing status-equivalent.
    #[error("upstream returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// `Retry-After` hint extracted by the transport layer, if any.
        retry_after: Option<Duration>,
    },

    #[error("upstream error: {0}")]
    Other(String),
}

impl UpstreamError {
    /// Shorthand for a status failure without a `Retry-After` hint.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        UpstreamError::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a `Retry-After` hint. No-op for variants other than `Status`.
    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        if let UpstreamError::Status { retry_after, .. } = &mut self {
            *retry_after = Some(hint);
        }
        self
    }

    /// Status code, when the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `Retry-After` hint, when the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the upstream asked us to slow down (HTTP 429 equivalent).
    pub fn is_throttled(&self) -> bool {
        self.status_code() == Some(429)
    }

    /// Default retry classification.
    ///
    /// Network failures and timeouts are retryable, as are the statuses in
    /// [`RETRYABLE_STATUSES`]. Everything else (4xx client errors, opaque
    /// failures) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Network(_) | UpstreamError::Timeout(_) => true,
            UpstreamError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            UpstreamError::Other(_) => false,
        }
    }
}

/// Errors returned by the executor and its collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeimdallError {
    // Admission control
    #[error("circuit open for '{key}'")]
    CircuitOpen {
        key: String,
        /// Time until the circuit becomes eligible for a probe.
        retry_in: Option<Duration>,
    },

    #[error("rate limited for '{key}', retry after {retry_after:?}")]
    RateLimited {
        key: String,
        retry_after: Option<Duration>,
    },

    // Terminal upstream outcomes
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: UpstreamError,
    },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<UpstreamError>,
    },

    /// Non-retryable upstream failure, passed through untouched.
    #[error(transparent)]
    Upstream(UpstreamError),

    #[error("operation cancelled")]
    Cancelled,

    // Local problems
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HeimdallError {
    /// Whether this is a local "try again later" signal rather than a
    /// genuine upstream failure.
    ///
    /// Callers typically route these to a degraded mode or a fallback
    /// data source.
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self,
            HeimdallError::CircuitOpen { .. } | HeimdallError::RateLimited { .. }
        )
    }

    /// The upstream failure behind this error, if there is one.
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            HeimdallError::Upstream(e) => Some(e),
            HeimdallError::RetriesExhausted { last, .. } => Some(last),
            HeimdallError::DeadlineExceeded { last, .. } => last.as_ref(),
            _ => None,
        }
    }

    /// Short outcome label, as used for the `status` metric label.
    pub fn label(&self) -> &'static str {
        match self {
            HeimdallError::CircuitOpen { .. } => "circuit_open",
            HeimdallError::RateLimited { .. } => "rate_limited",
            HeimdallError::RetriesExhausted { .. } => "retries_exhausted",
            HeimdallError::DeadlineExceeded { .. } => "deadline_exceeded",
            HeimdallError::Upstream(_) => "upstream_error",
            HeimdallError::Cancelled => "cancelled",
            HeimdallError::Configuration(_) => "configuration",
            HeimdallError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
