//! API error type and its JSON rendering.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::upstream::UpstreamError;

/// Every error an HTTP handler can return.
///
/// Rendered as `{"error": <code>, "message": <text>}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(e) => match e {
                UpstreamError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
                UpstreamError::Status { .. }
                | UpstreamError::Transport(_)
                | UpstreamError::Decode(_) => StatusCode::BAD_GATEWAY,
                UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                UpstreamError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Machine-readable code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::TOO_MANY_REQUESTS => "rate_limited",
            StatusCode::BAD_GATEWAY => "bad_gateway",
            StatusCode::SERVICE_UNAVAILABLE => "circuit_open",
            StatusCode::GATEWAY_TIMEOUT => "upstream_timeout",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        let mut response = (status, body).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_map_to_gateway_statuses() {
        let status = |e: UpstreamError| ApiError::from(e).status();
        assert_eq!(
            status(UpstreamError::Status { path: "products".into(), status: 500 }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(UpstreamError::Status { path: "products/9".into(), status: 404 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(UpstreamError::Timeout { path: "products".into(), timeout_ms: 10 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(UpstreamError::CircuitOpen { service: "products".into(), next_attempt: 0 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_json_body_and_retry_after() {
        let response = ApiError::RateLimited { retry_after: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limited");
        assert_eq!(json["message"], "rate limit exceeded, retry after 7s");
    }
}
