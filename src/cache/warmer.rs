//! Background cache warming.
//!
//! # Responsibilities
//! - Pre-fetch the storefront's hottest resources into the cache
//! - Guard against overlapping runs
//! - Re-run on a fixed interval until shutdown
//!
//! # Design Decisions
//! - A run is a fan-out of independent refreshes; one failing resource is
//!   logged and counted, never aborts the others
//! - The running flag is taken with a compare-exchange and released by a
//!   drop guard, so a cancelled or panicking run cannot wedge the warmer
//! - The scheduler is an explicit task owning a ticker and a shutdown
//!   receiver; the first tick fires immediately

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::clock::SharedClock;
use crate::observability::metrics;
use crate::upstream::service::{Resource, StorefrontService, MAX_PER_PAGE};

/// Most listing pages one warm run may fetch.
pub const MAX_WARM_PAGES: u32 = 50;

/// What a warm run fetches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmConfig {
    pub categories: bool,
    pub products: bool,
    /// Number of product listing pages, starting at page 1.
    pub product_pages: u32,
    pub per_page: u32,
    pub home: bool,
    pub search: bool,
    pub search_terms: Vec<String>,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            categories: true,
            products: true,
            product_pages: 3,
            per_page: 20,
            home: true,
            search: true,
            search_terms: vec!["sale".to_string(), "new".to_string(), "gift".to_string()],
        }
    }
}

impl WarmConfig {
    /// Reject targets the storefront itself would refuse to serve.
    pub fn validate(&self) -> Result<(), String> {
        if self.product_pages > MAX_WARM_PAGES {
            return Err(format!("product_pages must be at most {MAX_WARM_PAGES}"));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(format!("per_page must be between 1 and {MAX_PER_PAGE}"));
        }
        Ok(())
    }

    /// Resources selected by this config, in fetch order.
    pub fn resources(&self) -> Vec<Resource> {
        let mut resources = Vec::new();
        if self.categories {
            resources.push(Resource::Categories);
        }
        if self.products {
            resources.extend((1..=self.product_pages).map(|page| Resource::ProductList {
                page,
                per_page: self.per_page,
            }));
        }
        if self.home {
            resources.push(Resource::Home);
        }
        if self.search {
            resources.extend(
                self.search_terms
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(|t| Resource::Search(t.to_string())),
            );
        }
        resources
    }
}

/// Outcome of one warm run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmReport {
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Warmer snapshot for the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmStatus {
    pub is_running: bool,
    pub last_run: Option<u64>,
    pub next_run: Option<u64>,
    pub last_report: Option<WarmReport>,
}

#[derive(Debug, Default)]
struct Schedule {
    last_run: Option<u64>,
    next_run: Option<u64>,
    last_report: Option<WarmReport>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct CacheWarmer {
    service: Arc<StorefrontService>,
    clock: SharedClock,
    running: AtomicBool,
    schedule: Mutex<Schedule>,
}

impl CacheWarmer {
    pub fn new(service: Arc<StorefrontService>, clock: SharedClock) -> Self {
        Self {
            service,
            clock,
            running: AtomicBool::new(false),
            schedule: Mutex::new(Schedule::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Schedule> {
        self.schedule.lock().expect("warmer mutex poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn begin(&self) -> bool {
        let acquired = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !acquired {
            tracing::warn!("Cache warm already running, skipping");
        }
        acquired
    }

    /// Warm and wait. Returns `None` if a run was already in progress.
    pub async fn warm_now(&self, config: &WarmConfig) -> Option<WarmReport> {
        if !self.begin() {
            return None;
        }
        Some(self.run(config).await)
    }

    /// Start a run in the background. Returns false if one is already running.
    pub fn warm(self: &Arc<Self>, config: WarmConfig) -> bool {
        if !self.begin() {
            return false;
        }
        let warmer = self.clone();
        tokio::spawn(async move {
            warmer.run(&config).await;
        });
        true
    }

    async fn run(&self, config: &WarmConfig) -> WarmReport {
        let _running = RunningGuard(&self.running);
        let started = Instant::now();
        self.lock().last_run = Some(self.clock.now_ms());

        let resources = config.resources();
        tracing::info!(tasks = resources.len(), "Cache warm starting");

        let outcomes = futures_util::future::join_all(resources.iter().map(|resource| async move {
            let result = self.service.refresh(resource).await;
            if let Err(e) = &result {
                tracing::warn!(key = %resource.cache_key(), error = %e, "Cache warm task failed");
            }
            result.is_ok()
        }))
        .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = WarmReport {
            succeeded,
            failed: outcomes.len() - succeeded,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        metrics::record_warm_run(report.succeeded, report.failed);
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Cache warm finished"
        );

        self.lock().last_report = Some(report.clone());
        report
    }

    pub fn status(&self) -> WarmStatus {
        let schedule = self.lock();
        WarmStatus {
            is_running: self.is_running(),
            last_run: schedule.last_run,
            next_run: schedule.next_run,
            last_report: schedule.last_report.clone(),
        }
    }

    /// Warm every `interval` until `shutdown` fires.
    pub fn spawn_scheduler(
        self: &Arc<Self>,
        interval: Duration,
        config: WarmConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let warmer = self.clone();
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Cache warm scheduler starting");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        warmer.lock().next_run =
                            Some(warmer.clock.now_ms() + interval.as_millis() as u64);
                        warmer.warm_now(&config).await;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache warm scheduler received shutdown signal, exiting loop");
                        break;
                    }
                }
            }

            warmer.lock().next_run = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::manager::{CacheConfig, CacheManager};
    use crate::clock::ManualClock;
    use crate::config::CacheTtlConfig;
    use crate::resilience::dedup::{DedupConfig, RequestDeduplicator};
    use crate::upstream::{Upstream, UpstreamError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicU32;

    /// Fails every search request; everything else succeeds after `delay`.
    #[derive(Debug)]
    struct SlowUpstream {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl Upstream for SlowUpstream {
        async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if query.iter().any(|(k, _)| k == "search") {
                return Err(UpstreamError::Status {
                    path: path.to_string(),
                    status: 503,
                });
            }
            Ok(json!({ "path": path }))
        }
    }

    fn warmer(delay: Duration) -> (Arc<CacheWarmer>, Arc<CacheManager>, Arc<ManualClock>) {
        let clock = ManualClock::new(5_000);
        let upstream = Arc::new(SlowUpstream {
            calls: AtomicU32::new(0),
            delay,
        });
        let cache = Arc::new(CacheManager::in_memory(CacheConfig::default(), clock.clone()));
        let service = Arc::new(StorefrontService::new(
            cache.clone(),
            upstream,
            RequestDeduplicator::new(DedupConfig::default(), clock.clone()),
            CacheTtlConfig::default(),
        ));
        (Arc::new(CacheWarmer::new(service, clock.clone())), cache, clock)
    }

    fn no_search() -> WarmConfig {
        WarmConfig {
            search: false,
            product_pages: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_selects_resources() {
        let config = WarmConfig {
            categories: false,
            product_pages: 2,
            per_page: 10,
            home: false,
            search_terms: vec!["shoes".into(), "  ".into()],
            ..Default::default()
        };
        assert_eq!(
            config.resources(),
            vec![
                Resource::ProductList { page: 1, per_page: 10 },
                Resource::ProductList { page: 2, per_page: 10 },
                Resource::Search("shoes".into()),
            ]
        );
    }

    #[test]
    fn test_validate_bounds_listing_targets() {
        assert_eq!(WarmConfig::default().validate(), Ok(()));

        let huge = WarmConfig {
            product_pages: u32::MAX,
            ..Default::default()
        };
        assert!(huge.validate().unwrap_err().contains("product_pages"));

        for per_page in [0, MAX_PER_PAGE + 1, 5_000] {
            let config = WarmConfig {
                per_page,
                ..Default::default()
            };
            assert!(config.validate().unwrap_err().contains("per_page"));
        }
    }

    #[tokio::test]
    async fn test_warm_now_fills_cache() {
        let (warmer, cache, _) = warmer(Duration::from_millis(1));
        let report = warmer.warm_now(&no_search()).await.unwrap();

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 0);
        for key in ["categories:all", "products:page:1:20", "products:page:2:20", "home:feed"] {
            assert!(cache.exists(key).await, "{key} not warmed");
        }

        let status = warmer.status();
        assert!(!status.is_running);
        assert_eq!(status.last_run, Some(5_000));
        assert_eq!(status.last_report, Some(report));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tasks_do_not_abort_the_run() {
        let (warmer, cache, _) = warmer(Duration::from_millis(1));
        let config = WarmConfig {
            products: false,
            home: false,
            ..Default::default()
        };
        let report = warmer.warm_now(&config).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 3);
        assert!(cache.exists("categories:all").await);
        assert!(!warmer.is_running());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let (warmer, _, _) = warmer(Duration::from_millis(200));
        assert!(warmer.warm(no_search()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(warmer.status().is_running);
        assert!(!warmer.warm(no_search()));
        assert_eq!(warmer.warm_now(&no_search()).await, None);

        while warmer.is_running() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(warmer.status().last_report.map(|r| r.succeeded), Some(4));
    }

    #[tokio::test]
    async fn test_scheduler_runs_immediately_and_stops_on_shutdown() {
        let (warmer, cache, _) = warmer(Duration::from_millis(1));
        let (tx, rx) = broadcast::channel(1);
        let handle = warmer.spawn_scheduler(Duration::from_secs(3600), no_search(), rx);

        for _ in 0..100 {
            if cache.exists("home:feed").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.exists("home:feed").await);
        assert_eq!(warmer.status().next_run, Some(5_000 + 3_600_000));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert_eq!(warmer.status().next_run, None);
    }
}
