//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BffConfig (validated, immutable)
//!     → handed to HttpServer::new, which builds every component from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps the rate-limit policy table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only rate-limit policies hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BffConfig, CacheTtlConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    RateLimitConfig, RateLimitMode, StoreConfig, TimeoutConfig, TlsConfig, UpstreamConfig,
    WarmerConfig,
};
