//! Per-endpoint fixed-window rate limiting.
//!
//! # Responsibilities
//! - Resolve the policy for an endpoint (exact, longest prefix, default)
//! - Count requests per (client, endpoint) window
//! - Surface the decision as `X-RateLimit-*` headers, or 429 + `Retry-After`
//!
//! # Variants
//! - `LocalRateLimiter`: in-process counters, synchronous, no I/O
//! - `DistributedRateLimiter`: shared counters in the durable store so
//!   every instance sees the same windows; falls back to local counters
//!   whenever the store errors
//!
//! # Design Decisions
//! - Window keys are SHA-256 digests of prefix, endpoint and client, so raw
//!   client addresses never reach the shared store
//! - Expired local windows are swept every `SWEEP_EVERY` checks instead of
//!   on a timer
//! - Policies sit behind `ArcSwap` and are replaced wholesale on config reload

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::store::CounterStore;
use crate::clock::SharedClock;
use crate::config::{RateLimitConfig, RateLimitMode};
use crate::http::error::ApiError;
use crate::observability::metrics;

/// Sweep expired local windows once per this many checks.
const SWEEP_EVERY: u64 = 1024;

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Epoch milliseconds at which the window resets.
    pub reset_at: u64,
    /// Whole seconds to wait, set only when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub limit: u64,
}

impl RateLimitDecision {
    fn new(policy: RateLimitPolicy, count: u64, reset_at: u64, now: u64) -> Self {
        let allowed = count <= policy.max_requests;
        Self {
            allowed,
            remaining: policy.max_requests.saturating_sub(count),
            reset_at,
            retry_after: (!allowed).then(|| reset_at.saturating_sub(now).div_ceil(1000).max(1)),
            limit: policy.max_requests,
        }
    }
}

/// Endpoint → policy table.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicies {
    exact: HashMap<String, RateLimitPolicy>,
    /// Prefix rules, longest first.
    prefixes: Vec<(String, RateLimitPolicy)>,
    default: RateLimitPolicy,
}

impl RateLimitPolicies {
    /// Rules ending in `*` match by prefix; all others match exactly.
    pub fn new(default: RateLimitPolicy, rules: &BTreeMap<String, RateLimitPolicy>) -> Self {
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();
        for (endpoint, policy) in rules {
            match endpoint.strip_suffix('*') {
                Some(prefix) => prefixes.push((prefix.to_string(), *policy)),
                None => {
                    exact.insert(endpoint.clone(), *policy);
                }
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            exact,
            prefixes,
            default,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.default, &config.rules)
    }

    pub fn resolve(&self, endpoint: &str) -> RateLimitPolicy {
        if let Some(policy) = self.exact.get(endpoint) {
            return *policy;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .map(|(_, policy)| *policy)
            .unwrap_or(self.default)
    }
}

/// Hex SHA-256 of `"{prefix}:{endpoint}:{client}"`.
pub fn window_key(prefix: &str, endpoint: &str, client: &str) -> String {
    let digest = Sha256::digest(format!("{prefix}:{endpoint}:{client}").as_bytes());
    hex::encode(digest)
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    reset_at: u64,
}

/// In-process fixed-window limiter.
#[derive(Debug)]
pub struct LocalRateLimiter {
    windows: DashMap<String, Window>,
    policies: ArcSwap<RateLimitPolicies>,
    key_prefix: String,
    clock: SharedClock,
    checks: AtomicU64,
}

impl LocalRateLimiter {
    pub fn new(policies: RateLimitPolicies, key_prefix: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            policies: ArcSwap::from_pointee(policies),
            key_prefix: key_prefix.into(),
            clock,
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, endpoint: &str, client: &str) -> RateLimitDecision {
        let policy = self.policies.load().resolve(endpoint);
        let now = self.clock.now_ms();
        self.maybe_sweep(now);

        let key = window_key(&self.key_prefix, endpoint, client);
        let mut window = self.windows.entry(key).or_insert(Window {
            count: 0,
            reset_at: now + policy.window_ms,
        });
        if now > window.reset_at {
            *window = Window {
                count: 0,
                reset_at: now + policy.window_ms,
            };
        }
        window.count += 1;
        RateLimitDecision::new(policy, window.count, window.reset_at, now)
    }

    fn maybe_sweep(&self, now: u64) {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % SWEEP_EVERY == 0 {
            let before = self.windows.len();
            self.windows.retain(|_, w| w.reset_at >= now);
            tracing::debug!(
                swept = before.saturating_sub(self.windows.len()),
                "Swept expired rate limit windows"
            );
        }
    }

    pub fn policies(&self) -> Arc<RateLimitPolicies> {
        self.policies.load_full()
    }

    pub fn update_policies(&self, policies: RateLimitPolicies) {
        self.policies.store(Arc::new(policies));
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

/// Limiter backed by shared counters, with a local fallback.
#[derive(Debug)]
pub struct DistributedRateLimiter {
    store: Arc<dyn CounterStore>,
    fallback: LocalRateLimiter,
    key_prefix: String,
    clock: SharedClock,
}

impl DistributedRateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        policies: RateLimitPolicies,
        key_prefix: impl Into<String>,
        clock: SharedClock,
    ) -> Self {
        let key_prefix = key_prefix.into();
        Self {
            store,
            fallback: LocalRateLimiter::new(policies, key_prefix.clone(), clock.clone()),
            key_prefix,
            clock,
        }
    }

    pub async fn check(&self, endpoint: &str, client: &str) -> RateLimitDecision {
        let policy = self.fallback.policies().resolve(endpoint);
        let key = format!(
            "{}:{}",
            self.key_prefix,
            window_key(&self.key_prefix, endpoint, client)
        );

        match self
            .store
            .hit(&key, Duration::from_millis(policy.window_ms))
            .await
        {
            Ok(window) => {
                let now = self.clock.now_ms();
                RateLimitDecision::new(policy, window.count, now + window.ttl_ms, now)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit store unavailable, using local counters");
                metrics::record_store_fallback("rate_limit");
                self.fallback.check(endpoint, client)
            }
        }
    }

    pub fn update_policies(&self, policies: RateLimitPolicies) {
        self.fallback.update_policies(policies);
    }
}

/// The limiter selected by configuration.
#[derive(Debug)]
pub enum RateLimiter {
    Local(LocalRateLimiter),
    Distributed(DistributedRateLimiter),
}

impl RateLimiter {
    /// Build from config. Distributed mode without a store degrades to local.
    pub fn from_config(
        config: &RateLimitConfig,
        store: Option<Arc<dyn CounterStore>>,
        clock: SharedClock,
    ) -> Self {
        let policies = RateLimitPolicies::from_config(config);
        match (config.mode, store) {
            (RateLimitMode::Distributed, Some(store)) => RateLimiter::Distributed(
                DistributedRateLimiter::new(store, policies, config.key_prefix.clone(), clock),
            ),
            (mode, _) => {
                if mode == RateLimitMode::Distributed {
                    tracing::warn!("No durable store configured, rate limiting with local counters");
                }
                RateLimiter::Local(LocalRateLimiter::new(policies, config.key_prefix.clone(), clock))
            }
        }
    }

    pub async fn check(&self, endpoint: &str, client: &str) -> RateLimitDecision {
        match self {
            RateLimiter::Local(limiter) => limiter.check(endpoint, client),
            RateLimiter::Distributed(limiter) => limiter.check(endpoint, client).await,
        }
    }

    pub fn update_policies(&self, policies: RateLimitPolicies) {
        match self {
            RateLimiter::Local(limiter) => limiter.update_policies(policies),
            RateLimiter::Distributed(limiter) => limiter.update_policies(policies),
        }
    }

    pub fn mode(&self) -> RateLimitMode {
        match self {
            RateLimiter::Local(_) => RateLimitMode::Local,
            RateLimiter::Distributed(_) => RateLimitMode::Distributed,
        }
    }
}

/// First `X-Forwarded-For` hop, else the peer address.
pub fn client_identifier(request: &Request<Body>) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(client) = forwarded {
        return client.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
}

/// Middleware enforcing the limiter on every request it wraps.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = request.uri().path().to_string();
    let client = client_identifier(&request);
    let decision = limiter.check(&endpoint, &client).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, endpoint = %endpoint, "Rate limit exceeded");
        metrics::record_rate_limited(&endpoint);
        ApiError::RateLimited {
            retry_after: decision.retry_after.unwrap_or(1),
        }
        .into_response()
    };
    apply_headers(response.headers_mut(), &decision);
    response
}
