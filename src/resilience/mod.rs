//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Storefront read (cache miss):
//!     → dedup.rs (coalesce identical in-flight calls, retry with backoff)
//!     → timeouts.rs (per-endpoint deadline and retry policy)
//!     → registry.rs → circuit_breaker.rs (fail fast while a service is down)
//!     → upstream call
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Only reads are retried, and only through the deduplicator
//! - One breaker per upstream service, created on first use

pub mod backoff;
pub mod circuit_breaker;
pub mod dedup;
pub mod registry;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use dedup::{DedupConfig, DedupeOptions, RequestDeduplicator, Retryable};
pub use registry::BreakerRegistry;
