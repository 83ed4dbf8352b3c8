//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, rates within 0..=1)
//! - Check addresses and URLs parse before anything binds or connects
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BffConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::config::schema::{BffConfig, RateLimitPolicy};

/// A single rejected setting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &BffConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }

    match Url::parse(&config.upstream.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "upstream.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("upstream.base_url", e.to_string())),
    }
    for (name, value) in &config.upstream.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                format!("upstream.headers.{name}"),
                "invalid header name",
            ));
        }
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                format!("upstream.headers.{name}"),
                "invalid header value",
            ));
        }
    }
    if config.upstream.default_service.is_empty() {
        errors.push(ValidationError::new("upstream.default_service", "must not be empty"));
    }

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0"));
    }
    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be greater than 0"));
    }
    let ttl = &config.cache_ttl;
    for (field, secs) in [
        ("cache_ttl.product_list_secs", ttl.product_list_secs),
        ("cache_ttl.product_secs", ttl.product_secs),
        ("cache_ttl.categories_secs", ttl.categories_secs),
        ("cache_ttl.search_secs", ttl.search_secs),
        ("cache_ttl.home_secs", ttl.home_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if let Some(redis_url) = &config.store.redis_url {
        match Url::parse(redis_url) {
            Ok(url) if matches!(url.scheme(), "redis" | "rediss") => {}
            Ok(url) => errors.push(ValidationError::new(
                "store.redis_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("store.redis_url", e.to_string())),
        }
    }
    if config.store.op_timeout_ms == 0 {
        errors.push(ValidationError::new("store.op_timeout_ms", "must be greater than 0"));
    }

    check_policy("rate_limit.default", &config.rate_limit.default, &mut errors);
    for (endpoint, policy) in &config.rate_limit.rules {
        let field = format!("rate_limit.rules.{endpoint}");
        if !endpoint.starts_with('/') {
            errors.push(ValidationError::new(&field, "endpoint must start with '/'"));
        }
        check_policy(&field, policy, &mut errors);
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if !(breaker.expected_failure_rate > 0.0 && breaker.expected_failure_rate <= 1.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.expected_failure_rate",
            "must be within (0, 1]",
        ));
    }
    if breaker.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.dedup.window_ms == 0 {
        errors.push(ValidationError::new("dedup.window_ms", "must be greater than 0"));
    }
    if config.dedup.max_pending == 0 {
        errors.push(ValidationError::new("dedup.max_pending", "must be greater than 0"));
    }

    if config.warmer.enabled && config.warmer.interval_secs == 0 {
        errors.push(ValidationError::new("warmer.interval_secs", "must be greater than 0"));
    }

    if let Err(message) = config.warmer.targets.validate() {
        errors.push(ValidationError::new("warmer.targets", message));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(field: &str, policy: &RateLimitPolicy, errors: &mut Vec<ValidationError>) {
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(
            format!("{field}.max_requests"),
            "must be greater than 0",
        ));
    }
    if policy.window_ms == 0 {
        errors.push(ValidationError::new(
            format!("{field}.window_ms"),
            "must be greater than 0",
        ));
    }
}
