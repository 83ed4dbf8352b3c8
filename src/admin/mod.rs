//! Admin API: breaker control, cache maintenance, warming, dashboards.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuit-breakers", get(get_breakers))
        .route("/admin/circuit-breakers/{name}/reset", post(reset_breaker))
        .route("/admin/cache", delete(clear_cache))
        .route("/admin/cache/purge", post(purge_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/warm", post(start_warm).get(warm_status))
        .route("/admin/performance", get(performance))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
