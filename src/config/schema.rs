//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the BFF.
//! All types derive Serde traits for deserialization from config files.
//! Component-owned settings (breaker, dedup, cache, warm targets, rate-limit
//! policies) are defined next to the component and re-used here.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::cache::manager::CacheConfig;
pub use crate::cache::warmer::WarmConfig;
pub use crate::resilience::circuit_breaker::CircuitBreakerConfig;
pub use crate::resilience::dedup::DedupConfig;
pub use crate::security::rate_limit::RateLimitPolicy;

/// Root configuration for the storefront BFF.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BffConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Commerce API the BFF fronts.
    pub upstream: UpstreamConfig,

    /// Response cache.
    pub cache: CacheConfig,

    /// Per-resource cache lifetimes.
    pub cache_ttl: CacheTtlConfig,

    /// Optional durable key-value store shared by cache and rate limiter.
    pub store: StoreConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker settings, applied to every upstream service.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Request coalescing.
    pub dedup: DedupConfig,

    /// Background cache warming.
    pub warmer: WarmerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream commerce API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every resource path is joined onto.
    pub base_url: String,

    /// Credential headers sent with every request (e.g. consumer key/secret).
    pub headers: BTreeMap<String, String>,

    /// User-Agent sent upstream.
    pub user_agent: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Service name used for breakers when a path has no resource segment.
    pub default_service: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000/wp-json/wc/v3/".to_string(),
            headers: BTreeMap::new(),
            user_agent: concat!("storefront-bff/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 5,
            default_service: "commerce".to_string(),
        }
    }
}

/// Cache lifetimes per storefront resource, in seconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub product_list_secs: u64,
    pub product_secs: u64,
    pub categories_secs: u64,
    pub search_secs: u64,
    pub home_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            product_list_secs: 300,
            product_secs: 600,
            categories_secs: 3600,
            search_secs: 120,
            home_secs: 300,
        }
    }
}

/// Durable store connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL; when unset the BFF runs on in-process state only.
    pub redis_url: Option<String>,

    /// Upper bound on any single store operation, in milliseconds.
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout_ms: 250,
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Where rate-limit windows are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitMode {
    /// In-process counters only.
    Local,
    /// Shared counters in the durable store, in-process fallback.
    #[default]
    Distributed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Counter backend.
    pub mode: RateLimitMode,

    /// Prefix mixed into every window key.
    pub key_prefix: String,

    /// Policy for endpoints no rule matches.
    pub default: RateLimitPolicy,

    /// Per-endpoint policies. Keys are exact paths or prefixes ending in `*`.
    pub rules: BTreeMap<String, RateLimitPolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "/api/search".to_string(),
            RateLimitPolicy {
                max_requests: 30,
                window_ms: 60_000,
            },
        );
        rules.insert(
            "/admin/*".to_string(),
            RateLimitPolicy {
                max_requests: 60,
                window_ms: 60_000,
            },
        );
        Self {
            enabled: true,
            mode: RateLimitMode::default(),
            key_prefix: "ratelimit".to_string(),
            default: RateLimitPolicy::default(),
            rules,
        }
    }
}

/// Background cache warming.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmerConfig {
    /// Run the warm scheduler.
    pub enabled: bool,

    /// Seconds between scheduled runs.
    pub interval_secs: u64,

    /// What a scheduled run warms.
    pub targets: WarmConfig,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            targets: WarmConfig::default(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on handling any inbound request, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: BffConfig = toml::from_str(
            r#"
            [upstream]
            base_url = "https://shop.example.com/wp-json/wc/v3/"

            [upstream.headers]
            "x-consumer-key" = "ck_123"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.upstream.headers.get("x-consumer-key").map(String::as_str), Some("ck_123"));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.mode, RateLimitMode::Distributed);
        assert_eq!(config.cache_ttl.categories_secs, 3600);
        assert!(config.store.redis_url.is_none());
    }

    #[test]
    fn test_rate_limit_rules_and_modes_parse() {
        let config: BffConfig = toml::from_str(
            r#"
            [rate_limit]
            mode = "local"

            [rate_limit.default]
            max_requests = 10
            window_ms = 1000

            [rate_limit.rules."/api/products/*"]
            max_requests = 5
            window_ms = 1000

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.mode, RateLimitMode::Local);
        assert_eq!(config.rate_limit.default.max_requests, 10);
        assert_eq!(config.rate_limit.rules["/api/products/*"].max_requests, 5);
        // Explicit rules table replaces the default rules.
        assert!(!config.rate_limit.rules.contains_key("/api/search"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
