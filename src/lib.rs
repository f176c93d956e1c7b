//! Resilient outbound dispatch to a rate-limited upstream API.
//!
//! A [`Dispatcher`] combines a rotating credential pool, a retrying call
//! executor, per-service circuit breakers and per-operation idempotency caches.

// Core
pub mod credentials;
pub mod dispatch;
pub mod idempotency;
pub mod resilience;

// Edges
pub mod config;
pub mod upstream;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::DispatchConfig;
pub use dispatch::{AttemptError, DispatchError, Dispatcher, Outcome};
pub use lifecycle::Shutdown;
