//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → backends / health / limiter built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies rate limit changes to the live limiter
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only rate limits are reloadable; backends require a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, HealthCheckConfig, ListenerConfig, ObservabilityConfig,
    ProxyConfig, RateLimitConfig, TimeoutConfig,
};
pub use validation::{config_warnings, ValidationError};
pub use watcher::ConfigWatcher;
