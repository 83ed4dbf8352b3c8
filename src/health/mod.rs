//! Liveness and readiness endpoints.
//!
//! # Data Flow
//! ```text
//! GET /health → process is up
//! GET /ready  → breaker registry (any OPEN circuit → 503)
//!             → durable store ping (reported, never fatal)
//! ```
//!
//! # Design Decisions
//! - A missing or unreachable durable store does not fail readiness; the
//!   cache and rate limiter already degrade to memory without it
//! - Not rate limited, so orchestrator probes are never throttled

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::http::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let durable_store = match &state.store {
        None => "disabled",
        Some(store) => match store.ping().await {
            Ok(()) => "up",
            Err(e) => {
                tracing::warn!(error = %e, "Durable store ping failed");
                "down"
            }
        },
    };

    let open_circuits = state.breakers.open_circuits();
    if open_circuits.is_empty() {
        (
            StatusCode::OK,
            Json(json!({ "status": "ready", "durable_store": durable_store })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "degraded",
                "open_circuits": open_circuits,
                "durable_store": durable_store,
            })),
        )
    }
}
