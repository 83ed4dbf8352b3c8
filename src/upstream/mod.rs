//! Upstream commerce API access.
//!
//! # Data Flow
//! ```text
//! StorefrontService::fetch(resource)   (service.rs)
//!     → CacheManager::get             hit: return
//!     → RequestDeduplicator::dedupe   one execution per cache key, retries
//!         → Upstream::get_json        (client.rs)
//!             → CircuitBreaker::execute (per upstream service)
//!             → reqwest + tokio::time::timeout (per endpoint policy)
//!     → CacheManager::set             write-back with resource TTL and tags
//! ```
//!
//! # Design Decisions
//! - `Upstream` is a trait so the warmer and tests can run without a network
//! - `UpstreamError` is `Clone`: the deduplicator hands the same error to
//!   every waiter, and callers match on the variant to pick a status code

pub mod client;
pub mod service;

use async_trait::async_trait;
use serde_json::Value;

use crate::resilience::circuit_breaker::CircuitOpen;
use crate::resilience::dedup::Retryable;

pub use client::HttpUpstream;
pub use service::{Resource, StorefrontService};

/// Failure talking to the commerce API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned status {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("upstream timed out after {timeout_ms}ms for {path}")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    Decode(String),

    #[error("circuit open for service '{service}', retry after {next_attempt}")]
    CircuitOpen { service: String, next_attempt: u64 },
}

impl From<CircuitOpen> for UpstreamError {
    fn from(open: CircuitOpen) -> Self {
        UpstreamError::CircuitOpen {
            service: open.service,
            next_attempt: open.next_attempt,
        }
    }
}

impl Retryable for UpstreamError {
    /// A 404 stays a 404 however often it is asked for.
    fn is_retryable(&self) -> bool {
        !matches!(self, UpstreamError::Status { status: 404, .. })
    }
}

/// Read access to the commerce API.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    /// GET `path` (relative to the API base) with `query`, decoded as JSON.
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError>;
}
