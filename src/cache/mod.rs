//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Storefront read:
//!     → manager.rs (durable tier, then memory tier)
//!     → miss: upstream fetch, written back with TTL + tags
//!
//! Admin:
//!     → purge by glob (pattern.rs), invalidate by tag, clear
//!
//! Background:
//!     → warmer.rs refreshes hot resources on a timer
//! ```
//!
//! # Design Decisions
//! - The durable store (store.rs) is optional and may vanish at any time;
//!   every operation degrades to the memory tier instead of failing
//! - The same store also backs the distributed rate limiter's counters

pub mod manager;
pub mod pattern;
pub mod store;
pub mod warmer;

pub use manager::{CacheConfig, CacheManager, CacheStats};
pub use store::{
    CounterStore, DurableKeyValueStore, InMemoryStore, RedisStore, StoreError, StoreHandles,
};
pub use warmer::{CacheWarmer, WarmConfig, WarmReport, WarmStatus};
