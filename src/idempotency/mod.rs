//! Idempotency subsystem.
//!
//! # Data Flow
//! ```text
//! Client token (optional)
//!     → token.rs (reject anything that is not a UUID-v4 string)
//!     → cache.rs get() (hit: return stored result, no upstream call)
//!     → on fresh success: cache.rs set() (sweep/evict, then store with TTL)
//! ```
//!
//! # Design Decisions
//! - One cache per operation class, each with its own TTL and capacity
//! - Expiry is lazy on read plus a gated sweep on write; no background timer required
//! - Process-lifetime only: a restart is a full flush

pub mod cache;
pub mod token;

pub use cache::{CacheStats, IdempotencyCache};
pub use token::IdempotencyToken;
