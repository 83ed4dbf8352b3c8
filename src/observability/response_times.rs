//! Per-endpoint response times for the performance dashboard.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Serialize;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    last_ms: f64,
}

/// Aggregated latency for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTimes {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
}

#[derive(Debug, Default)]
pub struct ResponseTimeTracker {
    endpoints: DashMap<String, Timing>,
}

impl ResponseTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, endpoint: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut timing = self.endpoints.entry(endpoint.to_string()).or_default();
        if timing.count == 0 {
            timing.min_ms = ms;
            timing.max_ms = ms;
        } else {
            timing.min_ms = timing.min_ms.min(ms);
            timing.max_ms = timing.max_ms.max(ms);
        }
        timing.count += 1;
        timing.total_ms += ms;
        timing.last_ms = ms;
    }

    pub fn snapshot(&self) -> BTreeMap<String, EndpointTimes> {
        self.endpoints
            .iter()
            .map(|entry| {
                let t = *entry.value();
                (
                    entry.key().clone(),
                    EndpointTimes {
                        count: t.count,
                        avg_ms: if t.count == 0 { 0.0 } else { t.total_ms / t.count as f64 },
                        min_ms: t.min_ms,
                        max_ms: t.max_ms,
                        last_ms: t.last_ms,
                    },
                )
            })
            .collect()
    }

    pub fn reset(&self) {
        self.endpoints.clear();
    }
}

/// Times every routed request and feeds the tracker and request metrics.
pub async fn track_response_times(
    State(tracker): State<Arc<ResponseTimeTracker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    tracker.record(&format!("{method} {route}"), start.elapsed());
    metrics::record_request(&method, response.status().as_u16(), &route, start);
    response
}
