//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     Ctrl+C → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscribed task observes it and returns
//!
//! Intake (intake.rs):
//!     request line → task per request; finished tasks reaped while reading
//!     end of input → wait for in-flight; shutdown → abandon in-flight
//!
//! Maintenance (maintenance.rs):
//!     tick → sweep idempotency caches, log a stats summary
//!     shutdown → exit loop
//! ```
//!
//! # Design Decisions
//! - One broadcast channel for shutdown; tasks own their receivers
//! - Background work is housekeeping only; correctness never depends on it

pub mod intake;
pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use intake::{process_lines, IntakeSummary};
pub use maintenance::MaintenanceTask;
pub use shutdown::Shutdown;
