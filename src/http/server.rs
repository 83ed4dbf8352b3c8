//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Construct every shared component once and hold it in `AppState`
//! - Create the Axum router: storefront API, admin API, health
//! - Wire up middleware (tracing, request ID, timeout, body limit,
//!   rate limiting, response timing)
//! - Serve plain HTTP or TLS until the shutdown broadcast fires
//! - Apply hot-reloaded rate-limit policies and run the warm scheduler
//!
//! # Design Decisions
//! - No global singletons: handlers reach components through `State`
//! - Health routes sit outside the rate limiter so probes are never throttled

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer, map_response_body::MapResponseBodyLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::cache::{CacheManager, CacheWarmer, DurableKeyValueStore, StoreHandles};
use crate::clock::{self, SharedClock};
use crate::config::BffConfig;
use crate::health;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, request_span, set_request_id_layer};
use crate::net::tls;
use crate::observability::response_times::{track_response_times, ResponseTimeTracker};
use crate::resilience::dedup::RequestDeduplicator;
use crate::resilience::registry::BreakerRegistry;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitPolicies, RateLimiter};
use crate::upstream::{HttpUpstream, StorefrontService, Upstream, UpstreamError};

/// Admin request bodies are tiny; nothing else accepts a body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Slack between the storefront read budget and the router-wide timeout, so a
/// slow read answers with its own 504 body before the connection is cut.
const REQUEST_TIMEOUT_GRACE_SECS: u64 = 5;

/// How long in-flight TLS connections may drain after shutdown.
const TLS_DRAIN_SECS: u64 = 10;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BffConfig>,
    pub service: Arc<StorefrontService>,
    pub cache: Arc<CacheManager>,
    pub breakers: Arc<BreakerRegistry>,
    pub warmer: Arc<CacheWarmer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub response_times: Arc<ResponseTimeTracker>,
    pub store: Option<Arc<dyn DurableKeyValueStore>>,
    pub started_at: Instant,
}

/// Errors that stop the server from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),
}

/// HTTP server for the storefront BFF.
pub struct HttpServer {
    router: Router,
    config: Arc<BffConfig>,
    state: AppState,
}

impl HttpServer {
    /// Memory-only server on the system clock.
    pub fn new(config: BffConfig) -> Result<Self, ServerError> {
        Self::with_stores(config, None, clock::system())
    }

    /// Server whose cache and rate limiter share `stores` when present.
    pub fn with_stores(
        config: BffConfig,
        stores: Option<StoreHandles>,
        clock: SharedClock,
    ) -> Result<Self, ServerError> {
        let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker, clock.clone()));
        let upstream: Arc<dyn Upstream> =
            Arc::new(HttpUpstream::new(&config.upstream, breakers.clone())?);

        let cache = Arc::new(CacheManager::new(
            config.cache.clone(),
            stores.as_ref().map(|s| s.kv.clone()),
            clock.clone(),
        ));
        let service = Arc::new(StorefrontService::new(
            cache.clone(),
            upstream,
            RequestDeduplicator::new(config.dedup, clock.clone()),
            config.cache_ttl,
        ));
        let warmer = Arc::new(CacheWarmer::new(service.clone(), clock.clone()));
        let rate_limiter = Arc::new(RateLimiter::from_config(
            &config.rate_limit,
            stores.as_ref().map(|s| s.counters.clone()),
            clock,
        ));

        tracing::info!(
            upstream = %config.upstream.base_url,
            durable_store = stores.is_some(),
            rate_limit_mode = ?rate_limiter.mode(),
            "Storefront components initialized"
        );

        let config = Arc::new(config);
        let state = AppState {
            config: config.clone(),
            service,
            cache,
            breakers,
            warmer,
            rate_limiter,
            response_times: Arc::new(ResponseTimeTracker::new()),
            store: stores.map(|s| s.kv),
            started_at: Instant::now(),
        };

        let router = Self::build_router(state.clone());
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();

        let mut app = Router::new()
            .route("/api/products", get(handlers::list_products))
            .route("/api/products/{id}", get(handlers::get_product))
            .route("/api/categories", get(handlers::list_categories))
            .route("/api/search", get(handlers::search))
            .route("/api/home", get(handlers::home));

        if config.admin.enabled {
            app = app.merge(admin::router(state.clone()));
        }
        if config.rate_limit.enabled {
            app = app.route_layer(middleware::from_fn_with_state(
                state.rate_limiter.clone(),
                rate_limit_middleware,
            ));
        }

        app.merge(health::router())
            .layer(middleware::from_fn_with_state(
                state.response_times.clone(),
                track_response_times,
            ))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(request_span))
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.timeouts.request_secs + REQUEST_TIMEOUT_GRACE_SECS,
                    )))
                    .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                    .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
            )
    }

    /// Router for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BffConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// Configs arriving on `config_updates` replace the rate-limit policy
    /// table; everything else in them takes effect on restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<BffConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.config.listener.tls.is_some(),
            "HTTP server starting"
        );

        let scheduler = if self.config.warmer.enabled {
            Some(self.state.warmer.spawn_scheduler(
                Duration::from_secs(self.config.warmer.interval_secs),
                self.config.warmer.targets.clone(),
                shutdown.resubscribe(),
            ))
        } else {
            None
        };

        let limiter = self.state.rate_limiter.clone();
        let reload = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                limiter.update_policies(RateLimitPolicies::from_config(&config.rate_limit));
                tracing::info!(
                    rules = config.rate_limit.rules.len(),
                    "Rate limit policies reloaded"
                );
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        match &self.config.listener.tls {
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal(shutdown))
                    .await?;
            }
            Some(tls_config) => {
                let rustls = tls::load_tls_config(tls_config).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal(shutdown).await;
                    drain.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        reload.abort();
        if let Some(scheduler) = scheduler {
            let _ = scheduler.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolves when the shutdown broadcast fires or its sender is dropped.
async fn shutdown_signal(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
    tracing::info!("Shutdown signal received");
}
