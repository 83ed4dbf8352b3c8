//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (fixed window per client and endpoint)
//!     → 429 + Retry-After, or pass to the handler with X-RateLimit-* headers
//! ```
//!
//! # Design Decisions
//! - Clients are keyed by first X-Forwarded-For hop, else peer address
//! - Shared counters when a durable store exists, in-process otherwise
//! - A failing store never blocks traffic; the limiter falls back locally

pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimitPolicies, RateLimiter};
