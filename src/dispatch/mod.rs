//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch(operation, token, attempt)
//!     → idempotency token validated (invalid → rejected, nothing touched)
//!     → operation cache lookup (hit → Outcome::Cached)
//!     → RetryExecutor::run for the operation's service
//!         each attempt: pool.select() → attempt(lease) → pool.mark_*()
//!     → fresh success cached under the token → Outcome::Fresh
//! ```
//!
//! # Design Decisions
//! - The dispatcher never speaks the upstream protocol; callers inject one attempt
//! - Pool, breakers and caches are constructed objects owned by the dispatcher
//! - Reconfiguration swaps the pool reference; callers holding a lease are unaffected

pub mod dispatcher;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherStats};
pub use types::{AttemptError, DispatchError, DispatchResult, Outcome};
