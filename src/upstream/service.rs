//! Read-through storefront resources.
//!
//! Every storefront read goes cache first; a miss is coalesced per cache key
//! and fetched from the commerce API with the retry schedule of its
//! endpoint policy, then written back with the resource's TTL and tags.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use serde_json::{json, Value};

use crate::cache::manager::CacheManager;
use crate::config::CacheTtlConfig;
use crate::resilience::dedup::{DedupStats, DedupeOptions, RequestDeduplicator};
use crate::resilience::timeouts::{self, EndpointPolicy};
use crate::upstream::{Upstream, UpstreamError};

/// Products shown in each home feed section.
const HOME_SECTION_SIZE: u32 = 8;
const SEARCH_PAGE_SIZE: u32 = 20;
const CATEGORY_PAGE_SIZE: u32 = 100;
/// Largest listing page the commerce API is asked for.
pub const MAX_PER_PAGE: u32 = 100;

/// A cacheable storefront read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    ProductList { page: u32, per_page: u32 },
    Product(u64),
    Categories,
    /// Search term, already trimmed.
    Search(String),
    Home,
}

impl Resource {
    pub fn cache_key(&self) -> String {
        match self {
            Resource::ProductList { page, per_page } => format!("products:page:{page}:{per_page}"),
            Resource::Product(id) => format!("product:{id}"),
            Resource::Categories => "categories:all".to_string(),
            Resource::Search(term) => format!("search:{}", term.to_lowercase()),
            Resource::Home => "home:feed".to_string(),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        match self {
            Resource::ProductList { .. } => vec!["products".to_string()],
            Resource::Product(id) => vec!["products".to_string(), format!("product:{id}")],
            Resource::Categories => vec!["categories".to_string()],
            Resource::Search(_) => vec!["search".to_string()],
            Resource::Home => vec!["home".to_string()],
        }
    }

    pub fn ttl(&self, ttls: &CacheTtlConfig) -> Duration {
        let secs = match self {
            Resource::ProductList { .. } => ttls.product_list_secs,
            Resource::Product(_) => ttls.product_secs,
            Resource::Categories => ttls.categories_secs,
            Resource::Search(_) => ttls.search_secs,
            Resource::Home => ttls.home_secs,
        };
        Duration::from_secs(secs)
    }

    /// Logical endpoint used for policy resolution and response-time tracking.
    pub fn endpoint(&self) -> String {
        match self {
            Resource::ProductList { .. } => "products".to_string(),
            Resource::Product(id) => format!("products/{id}"),
            Resource::Categories => "products/categories".to_string(),
            Resource::Search(_) => "search".to_string(),
            Resource::Home => "home".to_string(),
        }
    }

    pub fn policy(&self) -> EndpointPolicy {
        timeouts::resolve(&self.endpoint(), &Method::GET)
    }
}

fn query(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Fetch `resource` from the commerce API. No caching, no retries.
pub async fn fetch_upstream(upstream: &dyn Upstream, resource: &Resource) -> Result<Value, UpstreamError> {
    match resource {
        Resource::ProductList { page, per_page } => {
            upstream
                .get_json(
                    "products",
                    &query(&[("page", page.to_string()), ("per_page", per_page.to_string())]),
                )
                .await
        }
        Resource::Product(id) => upstream.get_json(&format!("products/{id}"), &[]).await,
        Resource::Categories => {
            upstream
                .get_json(
                    "products/categories",
                    &query(&[("per_page", CATEGORY_PAGE_SIZE.to_string())]),
                )
                .await
        }
        Resource::Search(term) => {
            upstream
                .get_json(
                    "products",
                    &query(&[("search", term.clone()), ("per_page", SEARCH_PAGE_SIZE.to_string())]),
                )
                .await
        }
        Resource::Home => {
            let featured = query(&[
                ("featured", "true".to_string()),
                ("per_page", HOME_SECTION_SIZE.to_string()),
            ]);
            let latest = query(&[
                ("orderby", "date".to_string()),
                ("per_page", HOME_SECTION_SIZE.to_string()),
            ]);
            let (featured, latest) = futures_util::future::try_join(
                upstream.get_json("products", &featured),
                upstream.get_json("products", &latest),
            )
            .await?;
            Ok(json!({ "featured": featured, "latest": latest }))
        }
    }
}

/// Cache, coalescing and write-back around the commerce API.
#[derive(Debug)]
pub struct StorefrontService {
    cache: Arc<CacheManager>,
    upstream: Arc<dyn Upstream>,
    dedup: RequestDeduplicator<Value, UpstreamError>,
    ttls: CacheTtlConfig,
}

impl StorefrontService {
    pub fn new(
        cache: Arc<CacheManager>,
        upstream: Arc<dyn Upstream>,
        dedup: RequestDeduplicator<Value, UpstreamError>,
        ttls: CacheTtlConfig,
    ) -> Self {
        Self {
            cache,
            upstream,
            dedup,
            ttls,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    /// Cached value, or a coalesced upstream fetch on miss.
    pub async fn fetch(&self, resource: &Resource) -> Result<Value, UpstreamError> {
        if let Some(value) = self.cache.get(&resource.cache_key()).await {
            return Ok(value);
        }
        self.refresh(resource).await
    }

    /// Fetch from upstream and overwrite the cached copy.
    pub async fn refresh(&self, resource: &Resource) -> Result<Value, UpstreamError> {
        let key = resource.cache_key();
        let options = DedupeOptions::from(&resource.policy());
        let ttl = resource.ttl(&self.ttls);
        let tags = resource.tags();

        let upstream = self.upstream.clone();
        let cache = self.cache.clone();
        let resource = resource.clone();
        let write_key = key.clone();

        self.dedup
            .dedupe(
                &key,
                move || {
                    let upstream = upstream.clone();
                    let cache = cache.clone();
                    let resource = resource.clone();
                    let key = write_key.clone();
                    let tags = tags.clone();
                    async move {
                        let value = fetch_upstream(upstream.as_ref(), &resource).await?;
                        cache.set(&key, value.clone(), ttl, &tags).await;
                        Ok(value)
                    }
                },
                options,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::manager::CacheConfig;
    use crate::clock::ManualClock;
    use crate::resilience::dedup::DedupConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeUpstream {
        calls: AtomicU32,
        failing: AtomicBool,
        missing: AtomicBool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(path.to_string());
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.missing.load(Ordering::SeqCst) {
                return Err(UpstreamError::Status {
                    path: path.to_string(),
                    status: 404,
                });
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(UpstreamError::Status {
                    path: path.to_string(),
                    status: 500,
                });
            }
            Ok(json!({ "path": path, "query": query }))
        }
    }

    fn service() -> (Arc<StorefrontService>, Arc<FakeUpstream>) {
        let clock = ManualClock::new(1_000);
        let upstream = Arc::new(FakeUpstream::default());
        let cache = Arc::new(CacheManager::in_memory(CacheConfig::default(), clock.clone()));
        let dedup = RequestDeduplicator::new(DedupConfig::default(), clock);
        let service = StorefrontService::new(cache, upstream.clone(), dedup, CacheTtlConfig::default());
        (Arc::new(service), upstream)
    }

    #[test]
    fn test_cache_keys_and_tags() {
        let list = Resource::ProductList { page: 2, per_page: 20 };
        assert_eq!(list.cache_key(), "products:page:2:20");
        assert_eq!(list.tags(), vec!["products"]);
        assert_eq!(Resource::Product(123).cache_key(), "product:123");
        assert_eq!(Resource::Product(123).tags(), vec!["products", "product:123"]);
        assert_eq!(Resource::Search("Red Shoes".into()).cache_key(), "search:red shoes");
        assert_eq!(Resource::Categories.policy().category, "reference");
        assert_eq!(Resource::Product(1).policy().category, "detail");
        assert_eq!(Resource::Home.policy().category, "list");
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let (service, upstream) = service();
        let first = service.fetch(&Resource::Product(7)).await.unwrap();
        let second = service.fetch(&Resource::Product(7)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first["path"], "products/7");
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let (service, upstream) = service();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.fetch(&Resource::Categories).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_home_feed_combines_two_sections() {
        let (service, upstream) = service();
        let home = service.fetch(&Resource::Home).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(home.get("featured").is_some());
        assert!(home.get("latest").is_some());
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cached_copy() {
        let (service, upstream) = service();
        service.fetch(&Resource::Categories).await.unwrap();
        service.refresh(&Resource::Categories).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_and_not_cached() {
        let (service, upstream) = service();
        upstream.failing.store(true, Ordering::SeqCst);

        let err = service.fetch(&Resource::Categories).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 500, .. }));
        // Reference policy: one retry.
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(!service.cache().exists("categories:all").await);

        upstream.failing.store(false, Ordering::SeqCst);
        service.fetch(&Resource::Categories).await.unwrap();
        assert!(service.cache().exists("categories:all").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resource_is_not_retried() {
        let (service, upstream) = service();
        upstream.missing.store(true, Ordering::SeqCst);

        let err = service.fetch(&Resource::Product(404)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 404, .. }));
        // Detail policy allows three retries; none are spent on a 404.
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tag_invalidation_forces_refetch() {
        let (service, upstream) = service();
        service.fetch(&Resource::Product(123)).await.unwrap();
        service.fetch(&Resource::Product(456)).await.unwrap();

        let removed = service
            .cache()
            .invalidate_by_tags(&["product:123".to_string()])
            .await;
        assert_eq!(removed, 1);

        service.fetch(&Resource::Product(456)).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        service.fetch(&Resource::Product(123)).await.unwrap();
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
    }
}
