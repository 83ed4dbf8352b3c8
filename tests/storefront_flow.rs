//! End-to-end storefront reads against a mock commerce API.

mod common;

use std::time::Duration;

use common::{start_mock_upstream, start_server, test_config, ADMIN_KEY};
use serde_json::Value;

#[tokio::test]
async fn test_product_list_is_cached_after_first_read() {
    let upstream = start_mock_upstream(|_| async { (200, r#"[{"id":1,"name":"Mug"}]"#.to_string()) }).await;
    let server = start_server(test_config(&upstream)).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client
            .get(server.url("/api/products?page=1&per_page=10"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().contains_key("x-request-id"));
        let body: Value = res.json().await.unwrap();
        assert_eq!(body[0]["name"], "Mug");
    }
    assert_eq!(upstream.hits(), 1);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_concurrent_reads_share_one_upstream_call() {
    let upstream = start_mock_upstream(|_| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        (200, r#"[{"id":7,"name":"Outdoor"}]"#.to_string())
    })
    .await;
    let server = start_server(test_config(&upstream)).await;
    let client = reqwest::Client::new();

    let requests = (0..5).map(|_| {
        let client = client.clone();
        let url = server.url("/api/categories");
        async move { client.get(url).send().await.unwrap().json::<Value>().await.unwrap() }
    });
    let bodies = futures_util::future::join_all(requests).await;

    assert!(bodies.iter().all(|b| b[0]["id"] == 7));
    assert_eq!(upstream.hits(), 1);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_home_feed_combines_featured_and_latest() {
    let upstream = start_mock_upstream(|target| async move {
        if target.contains("featured=true") {
            (200, r#"[{"id":1}]"#.to_string())
        } else {
            (200, r#"[{"id":2},{"id":3}]"#.to_string())
        }
    })
    .await;
    let server = start_server(test_config(&upstream)).await;

    let body: Value = reqwest::get(server.url("/api/home")).await.unwrap().json().await.unwrap();
    assert_eq!(body["featured"].as_array().unwrap().len(), 1);
    assert_eq!(body["latest"].as_array().unwrap().len(), 2);
    assert_eq!(upstream.hits(), 2);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_invalid_queries_are_rejected_without_upstream_calls() {
    let upstream = start_mock_upstream(|_| async { (200, "[]".to_string()) }).await;
    let server = start_server(test_config(&upstream)).await;
    let client = reqwest::Client::new();

    for path in ["/api/search?q=%20%20", "/api/search", "/api/products?page=0", "/api/products?per_page=500"] {
        let res = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(res.status(), 400, "{path}");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }
    assert_eq!(upstream.hits(), 0);

    server.shutdown.trigger();
}

#[tokio::test]
async fn test_tag_invalidation_forces_refetch() {
    let upstream = start_mock_upstream(|_| async { (200, r#"{"id":123}"#.to_string()) }).await;
    let server = start_server(test_config(&upstream)).await;
    let client = reqwest::Client::new();

    client.get(server.url("/api/products/123")).send().await.unwrap();
    client.get(server.url("/api/products/123")).send().await.unwrap();
    assert_eq!(upstream.hits(), 1);

    let res = client
        .post(server.url("/admin/cache/invalidate"))
        .bearer_auth(ADMIN_KEY)
        .json(&serde_json::json!({ "tags": ["product:123"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["deletedCount"], 1);

    client.get(server.url("/api/products/123")).send().await.unwrap();
    assert_eq!(upstream.hits(), 2);

    server.shutdown.trigger();
}
