//! Timeout and retry policy resolution.
//!
//! # Responsibilities
//! - Map an upstream endpoint (and method) to a timeout/retry policy
//! - Compute the backoff delay for a given retry attempt
//!
//! # Design Decisions
//! - Pure lookup: the table is static and resolution is deterministic
//! - Endpoints are normalized before matching so `/wp-json/wc/v3/products?page=2`
//!   and `products` land on the same policy
//! - Reference data tolerates long timeouts with few retries; list/detail
//!   reads get moderate timeouts with more retries; writes are never retried

use std::time::Duration;

use axum::http::Method;
use serde::Serialize;

use crate::resilience::backoff::calculate_backoff;

/// Timeout and retry tuple applied to one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EndpointPolicy {
    /// Category the endpoint resolved to.
    pub category: &'static str,
    #[serde(rename = "timeoutMs", serialize_with = "as_millis")]
    pub timeout: Duration,
    #[serde(rename = "retryDelayMs", serialize_with = "as_millis")]
    pub retry_delay: Duration,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(rename = "backoffMultiplier")]
    pub backoff_multiplier: f64,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

const fn policy(
    category: &'static str,
    timeout_ms: u64,
    retry_delay_ms: u64,
    max_retries: u32,
    backoff_multiplier: f64,
) -> EndpointPolicy {
    EndpointPolicy {
        category,
        timeout: Duration::from_millis(timeout_ms),
        retry_delay: Duration::from_millis(retry_delay_ms),
        max_retries,
        backoff_multiplier,
    }
}

pub const WRITE_POLICY: EndpointPolicy = policy("write", 30_000, 2_000, 0, 1.0);
pub const REFERENCE_POLICY: EndpointPolicy = policy("reference", 15_000, 2_000, 1, 1.5);
pub const LIST_POLICY: EndpointPolicy = policy("list", 10_000, 1_000, 3, 2.0);
pub const DETAIL_POLICY: EndpointPolicy = policy("detail", 8_000, 500, 3, 2.0);
pub const DEFAULT_POLICY: EndpointPolicy = policy("default", 10_000, 1_000, 2, 2.0);

/// Resources that change rarely and are shared by every page.
const REFERENCE_RESOURCES: &[&str] = &[
    "categories",
    "attributes",
    "tags",
    "settings",
    "shipping",
    "tax",
];

/// Collection resources that are listed and paginated.
const LIST_RESOURCES: &[&str] = &["products", "orders", "reviews", "search", "home"];

/// Path prefixes the upstream API may be mounted under.
const API_PREFIXES: &[&str] = &["wp-json/wc/v3/", "api/v1/", "api/"];

/// Resolve the policy for an endpoint.
pub fn resolve(endpoint: &str, method: &Method) -> EndpointPolicy {
    if !(method == Method::GET || method == Method::HEAD) {
        return WRITE_POLICY;
    }

    let normalized = normalize(endpoint);
    let mut segments = normalized.split('/').filter(|s| !s.is_empty());
    let Some(resource) = segments.next() else {
        return DEFAULT_POLICY;
    };

    if REFERENCE_RESOURCES.contains(&resource) {
        return REFERENCE_POLICY;
    }

    if LIST_RESOURCES.contains(&resource) {
        return match segments.next() {
            None => LIST_POLICY,
            // e.g. products/categories, products/tags
            Some(sub) if REFERENCE_RESOURCES.contains(&sub) => REFERENCE_POLICY,
            Some(_) => DETAIL_POLICY,
        };
    }

    DEFAULT_POLICY
}

/// Delay before retry `attempt` under `policy`.
pub fn retry_delay(attempt: u32, policy: &EndpointPolicy) -> Duration {
    calculate_backoff(attempt, policy.retry_delay, policy.backoff_multiplier)
}

/// Strip query, slashes and known API prefixes; lowercase.
pub fn normalize(endpoint: &str) -> String {
    let path = endpoint.split(['?', '#']).next().unwrap_or_default();
    let mut path = path.trim_matches('/').to_ascii_lowercase();
    for prefix in API_PREFIXES {
        if let Some(rest) = path.strip_prefix(prefix) {
            path = rest.to_string();
            break;
        }
    }
    path
}
