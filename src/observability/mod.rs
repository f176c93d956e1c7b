//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stderr)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Dispatcher::stats() snapshots for status surfaces
//! ```
//!
//! # Design Decisions
//! - Structured fields (service, credential, attempt) on every event
//! - Secrets never logged; credentials appear by label only
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;
