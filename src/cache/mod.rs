//! Caching subsystem.
//!
//! - [`response::ResponseCache`]: TTL + LRU store of completed results
//!   with in-flight deduplication. A hit bypasses rate limiting, the circuit
//!   breaker and retries entirely. See the [`response`] module docs for the
//!   locking scheme.
//!
//! - [`fingerprint()`]: canonical request fingerprints (method, path,
//!   sorted parameters, body digest) to key the cache with.
//!
//! Only idempotent reads belong in the cache; routing mutating calls
//! through it is the caller's mistake to avoid.

pub mod fingerprint;
pub mod response;

pub use fingerprint::fingerprint;
pub use response::{CacheConfig, CacheStats, ResponseCache};
