//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, merge credentials from environment)
//!     → validation.rs (semantic checks)
//!     → DispatchConfig (validated, immutable)
//!     → Dispatcher::from_config builds pool, breakers and caches
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs diffs against the last config seen
//!         - credentials changed → CredentialReload → Dispatcher::rebuild_pool
//!         - other sections changed → warning, applied on restart
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use watcher::{ConfigWatcher, CredentialReload};
pub use schema::{
    BreakerConfig, BreakerPolicy, CredentialConfig, DispatchConfig, MaintenanceConfig,
    ObservabilityConfig, OperationConfig, PoolConfig, RetryConfig, UpstreamConfig,
};
