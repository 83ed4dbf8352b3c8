use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::{CacheStats, WarmConfig, WarmStatus};
use crate::config::RateLimitMode;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::resilience::circuit_breaker::CircuitBreakerStats;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub rate_limit_mode: Option<RateLimitMode>,
    pub durable_store: bool,
    pub open_circuits: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    pub pattern: Option<String>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WarmRequest {
    pub config: Option<WarmConfig>,
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        rate_limit_mode: state
            .config
            .rate_limit
            .enabled
            .then(|| state.rate_limiter.mode()),
        durable_store: state.cache.has_durable_store(),
        open_circuits: state.breakers.open_circuits(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.breakers.stats()))
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CircuitBreakerStats>, ApiError> {
    let breaker = state
        .breakers
        .find(&name)
        .ok_or_else(|| ApiError::NotFound(format!("no circuit breaker named '{name}'")))?;
    breaker.reset();
    tracing::info!(service = %name, "Circuit breaker reset by admin");
    Ok(Json(breaker.stats()))
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.cache.clear().await;
    tracing::info!(entries = cleared, "Cache cleared by admin");
    Json(json!({ "cleared": true }))
}

pub async fn purge_cache(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: PurgeRequest = parse_body(&body)?;
    match (request.pattern, request.all) {
        (Some(_), true) => Err(ApiError::Validation(
            "'pattern' and 'all' are mutually exclusive".into(),
        )),
        (None, false) => Err(ApiError::Validation("either 'pattern' or 'all' is required".into())),
        (None, true) => {
            state.cache.clear().await;
            Ok(Json(json!({ "cleared": true })))
        }
        (Some(pattern), false) => {
            if pattern.trim().is_empty() {
                return Err(ApiError::Validation("'pattern' must not be empty".into()));
            }
            let deleted = state.cache.purge(&pattern).await;
            tracing::info!(pattern = %pattern, deleted, "Cache purged by admin");
            Ok(Json(json!({ "deletedCount": deleted })))
        }
    }
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: InvalidateRequest = parse_body(&body)?;
    let tags: Vec<String> = request
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if tags.is_empty() {
        return Err(ApiError::Validation("'tags' must contain at least one tag".into()));
    }

    let deleted = state.cache.invalidate_by_tags(&tags).await;
    tracing::info!(tags = ?tags, deleted, "Cache invalidated by admin");
    Ok(Json(json!({ "deletedCount": deleted })))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

pub async fn start_warm(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request: WarmRequest = parse_body(&body)?;
    let config = request
        .config
        .unwrap_or_else(|| state.config.warmer.targets.clone());
    config.validate().map_err(ApiError::Validation)?;

    if !state.warmer.warm(config) {
        return Err(ApiError::Conflict("cache warm already running".into()));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "started": true }))))
}

pub async fn warm_status(State(state): State<AppState>) -> Json<WarmStatus> {
    Json(state.warmer.status())
}

pub async fn performance(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "cache": state.cache.stats(),
        "dedup": state.service.dedup_stats(),
        "circuitBreakers": state.breakers.stats(),
        "responseTimes": state.response_times.snapshot(),
        "warmer": state.warmer.status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_parses_as_default() {
        let purge: PurgeRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(purge.pattern.is_none());
        assert!(!purge.all);

        let warm: WarmRequest = parse_body(&Bytes::from_static(b"{\"config\":{\"home\":false}}")).unwrap();
        let config = warm.config.unwrap();
        assert!(!config.home);
        assert!(config.categories);

        let err = parse_body::<InvalidateRequest>(&Bytes::from_static(b"{tags")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
