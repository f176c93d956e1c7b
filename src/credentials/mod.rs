//! Credential rotation subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher attempt
//!     → pool.rs select() (first credential out of cooldown, in rotation order)
//!     → credential.rs lease handed to the upstream attempt
//!     → attempt outcome:
//!         - rate limited → mark_rate_limited() (cooldown, counter++)
//!         - anything else → mark_success() (counter reset)
//! ```
//!
//! # Design Decisions
//! - One mutex per pool; critical sections never perform I/O
//! - Selection never fails: total exhaustion degrades to least-cooldown
//! - Reconfiguration builds a new pool instead of mutating the live one

pub mod credential;
pub mod pool;

pub use credential::{mask_secret, Credential, CredentialLease};
pub use pool::{CredentialPool, CredentialStats, PoolError, PoolStats};
