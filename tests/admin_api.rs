//! Admin and health routes driven through the router in-process.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use storefront_bff::{BffConfig, HttpServer};
use tower::ServiceExt;

use common::ADMIN_KEY;

fn router() -> Router {
    let mut config = BffConfig::default();
    config.admin.api_key = ADMIN_KEY.to_string();
    config.observability.metrics_enabled = false;
    config.rate_limit.mode = storefront_bff::config::RateLimitMode::Local;
    HttpServer::new(config).unwrap().router()
}

async fn send(router: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_admin_requires_bearer_token() {
    let router = router();

    let (status, body) = send(&router, Method::GET, "/admin/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&router, Method::GET, "/admin/status", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&router, Method::GET, "/admin/status", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["rateLimitMode"], "local");
    assert_eq!(body["durableStore"], false);
    assert_eq!(body["openCircuits"], json!([]));
}

#[tokio::test]
async fn test_purge_arguments_are_mutually_exclusive() {
    let router = router();
    let token = Some(ADMIN_KEY);

    let (status, _) = send(&router, Method::POST, "/admin/cache/purge", token, Some(json!({ "pattern": "products:*", "all": true }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, Method::POST, "/admin/cache/purge", token, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&router, Method::POST, "/admin/cache/purge", token, Some(json!({ "pattern": "products:*" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 0);

    let (status, body) = send(&router, Method::POST, "/admin/cache/purge", token, Some(json!({ "all": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);

    let (status, body) = send(&router, Method::DELETE, "/admin/cache", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);
}

#[tokio::test]
async fn test_invalidate_requires_tags() {
    let router = router();
    let token = Some(ADMIN_KEY);

    let (status, body) = send(&router, Method::POST, "/admin/cache/invalidate", token, Some(json!({ "tags": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = send(&router, Method::POST, "/admin/cache/invalidate", token, Some(json!({ "tags": ["products"] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 0);
}

#[tokio::test]
async fn test_unknown_breaker_reset_is_not_found() {
    let router = router();
    let (status, body) = send(&router, Method::POST, "/admin/circuit-breakers/nope/reset", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_dashboards_and_health() {
    let router = router();
    let token = Some(ADMIN_KEY);

    let (status, body) = send(&router, Method::GET, "/admin/cache/stats", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["memoryEntries"], 0);

    let (status, body) = send(&router, Method::GET, "/admin/performance", token, None).await;
    assert_eq!(status, StatusCode::OK);
    for section in ["cache", "dedup", "circuitBreakers", "responseTimes", "warmer"] {
        assert!(body.get(section).is_some(), "missing {section}");
    }
    assert!(body["responseTimes"].get("GET /admin/cache/stats").is_some());

    let (status, body) = send(&router, Method::GET, "/admin/cache/warm", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isRunning"], false);

    let (status, body) = send(&router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["durable_store"], "disabled");
}

#[tokio::test]
async fn test_warm_rejects_out_of_range_targets() {
    let router = router();
    let token = Some(ADMIN_KEY);

    for config in [
        json!({ "product_pages": 4294967295u32 }),
        json!({ "per_page": 0 }),
        json!({ "per_page": 5000 }),
    ] {
        let (status, body) = send(&router, Method::POST, "/admin/cache/warm", token, Some(json!({ "config": config }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{config}");
        assert_eq!(body["error"], "validation_error");
    }

    let (_, body) = send(&router, Method::GET, "/admin/cache/warm", token, None).await;
    assert_eq!(body["isRunning"], false);
}
