//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream attempt:
//!     → circuit_breaker.rs (fail fast if the service's circuit is open)
//!     → timeouts.rs (per-attempt deadline chosen by the call site)
//!     → retries.rs (classify outcome; retryable → backoff.rs delay → next attempt)
//!     → circuit_breaker.rs (record success/failure of every attempt)
//! ```
//!
//! # Design Decisions
//! - All retry policy lives here; callers never retry on their own
//! - Credential throttling and service health are separate failure domains
//! - Breaker transitions are evaluated lazily on read, not by a timer

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{BreakerRegistry, BreakerStats, CircuitBreaker};
pub use retries::{RetryDecision, RetryExecutor};
