//! Per-call options.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Describes one call routed through an [`Executor`](super::Executor).
///
/// Only the endpoint key is required. Everything else is opt-in:
///
/// ```rust
/// # use heimdall::Call;
/// # use std::time::Duration;
/// let call = Call::new("users-api")
///     .fingerprint("GET:/users/1")
///     .ttl(Duration::from_secs(30))
///     .deadline(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// Endpoint key that partitions breaker and rate-limit state.
    pub key: String,
    /// Cache fingerprint. `None` (or empty) bypasses the cache.
    pub fingerprint: Option<String>,
    /// Cache TTL for this call, overriding the configured default.
    pub ttl: Option<Duration>,
    /// Overall budget across all attempts and backoff sleeps.
    ///
    /// With a fingerprint, the upstream work is shared between identical
    /// calls and runs under the deadline of the call that started it. A
    /// caller joining that work waits for its result; bound that wait with
    /// [`cancel`](Self::cancel) if it must be shorter.
    pub deadline: Option<Duration>,
    /// Aborts backoff sleeps and waits on shared results.
    pub cancel: Option<CancellationToken>,
}

impl Call {
    /// Call against `key` with no caching, deadline or token.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Cache the response under `fingerprint`.
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Override the cache TTL for this call.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Bound the whole call, backoff included.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort waits when `token` is cancelled.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The fingerprint to cache under, if caching applies.
    pub(crate) fn cache_key(&self) -> Option<&str> {
        self.fingerprint.as_deref().filter(|fp| !fp.is_empty())
    }
}
