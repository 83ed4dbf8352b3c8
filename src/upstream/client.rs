//! HTTP client for the commerce API.
//!
//! # Responsibilities
//! - Join resource paths onto the configured base URL
//! - Attach credential headers and the user agent to every request
//! - Bound each call with the timeout resolved for its endpoint
//! - Route each call through the breaker of its upstream service
//!
//! # Design Decisions
//! - The service (and breaker) is the first path segment after
//!   normalization, so `products/42` and `products/categories` share the
//!   `products` breaker while `orders` trips independently
//! - The timeout covers the whole exchange including the body read
//! - Non-2xx responses are failures, whatever the status

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

use crate::config::UpstreamConfig;
use crate::observability::metrics;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::timeouts;
use crate::upstream::{Upstream, UpstreamError};

/// reqwest-backed [`Upstream`].
#[derive(Debug)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: Url,
    default_service: String,
    breakers: Arc<BreakerRegistry>,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig, breakers: Arc<BreakerRegistry>) -> Result<Self, UpstreamError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| UpstreamError::Transport(format!("invalid base url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| UpstreamError::Transport(format!("invalid header name: {e}")))?;
            let mut value = HeaderValue::from_str(value)
                .map_err(|e| UpstreamError::Transport(format!("invalid header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            default_service: config.default_service.clone(),
            breakers,
        })
    }

    /// Upstream service a path belongs to.
    pub fn service_for(&self, path: &str) -> String {
        timeouts::normalize(path)
            .split('/')
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_service.clone())
    }

    async fn send(
        &self,
        path: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| UpstreamError::Transport(format!("invalid path '{path}': {e}")))?;
        let timed_out = || UpstreamError::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let exchange = async {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(UpstreamError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                });
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| UpstreamError::Decode(e.to_string()))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .unwrap_or_else(|_| Err(timed_out()))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError> {
        let policy = timeouts::resolve(path, &Method::GET);
        let service = self.service_for(path);
        let breaker = self.breakers.get(&service);
        let started = Instant::now();

        let result = breaker
            .execute(|| self.send(path, query, policy.timeout))
            .await;

        metrics::record_upstream_call(&service, result.is_ok(), started);
        match &result {
            Ok(_) => tracing::debug!(
                service = %service,
                path = %path,
                category = policy.category,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upstream call succeeded"
            ),
            Err(e) => tracing::warn!(
                service = %service,
                path = %path,
                category = policy.category,
                error = %e,
                "Upstream call failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;

    fn upstream(base_url: &str) -> HttpUpstream {
        let config = UpstreamConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        let breakers = Arc::new(BreakerRegistry::new(
            CircuitBreakerConfig::default(),
            clock::system(),
        ));
        HttpUpstream::new(&config, breakers).unwrap()
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = upstream("https://shop.example.com/wp-json/wc/v3");
        assert_eq!(client.base_url.as_str(), "https://shop.example.com/wp-json/wc/v3/");
        assert_eq!(
            client.base_url.join("products/42").unwrap().as_str(),
            "https://shop.example.com/wp-json/wc/v3/products/42"
        );
    }

    #[test]
    fn test_service_is_first_resource_segment() {
        let client = upstream("https://shop.example.com/");
        assert_eq!(client.service_for("products/42"), "products");
        assert_eq!(client.service_for("/wp-json/wc/v3/products/categories"), "products");
        assert_eq!(client.service_for("orders?page=2"), "orders");
        assert_eq!(client.service_for("/"), "commerce");
    }

    #[test]
    fn test_invalid_credentials_header_is_rejected() {
        let mut config = UpstreamConfig::default();
        config.headers.insert("bad header".into(), "x".into());
        let breakers = Arc::new(BreakerRegistry::new(
            CircuitBreakerConfig::default(),
            clock::system(),
        ));
        assert!(matches!(
            HttpUpstream::new(&config, breakers),
            Err(UpstreamError::Transport(_))
        ));
    }
}
