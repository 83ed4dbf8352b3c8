//! Storefront backend-for-frontend library.
//!
//! Fronts a commerce REST API with a two-tier tag-aware cache, request
//! coalescing, per-service circuit breakers and fixed-window rate limiting.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use config::schema::BffConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
