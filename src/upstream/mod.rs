//! Upstream transport adapters.
//!
//! The dispatcher only needs "perform one attempt with this credential and
//! classify the failure". `http.rs` provides that for a JSON-over-HTTP API.

pub mod http;

pub use http::{classify_status, HttpUpstream, UpstreamSetupError};
