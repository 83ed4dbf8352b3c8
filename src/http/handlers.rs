//! Storefront API handlers.
//!
//! Thin adapters: validate the query, name the resource, hand it to the
//! storefront service. Caching, coalescing and breaker handling all happen
//! below this layer. Each read is bounded by `timeouts.request_secs`; an
//! abandoned upstream fetch keeps running and still fills the cache.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::upstream::service::MAX_PER_PAGE;
use crate::upstream::{Resource, UpstreamError};

pub const DEFAULT_PER_PAGE: u32 = 20;

/// Read `resource` within the configured request budget.
async fn fetch(state: &AppState, resource: Resource) -> Result<Json<Value>, ApiError> {
    let budget = Duration::from_secs(state.config.timeouts.request_secs);
    match tokio::time::timeout(budget, state.service.fetch(&resource)).await {
        Ok(result) => Ok(Json(result?)),
        Err(_) => Err(UpstreamError::Timeout {
            path: resource.endpoint(),
            timeout_ms: budget.as_millis() as u64,
        }
        .into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if page == 0 {
        return Err(ApiError::Validation("page must be at least 1".into()));
    }
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(ApiError::Validation(format!(
            "per_page must be between 1 and {MAX_PER_PAGE}"
        )));
    }

    fetch(&state, Resource::ProductList { page, per_page }).await
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    fetch(&state, Resource::Product(id)).await
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    fetch(&state, Resource::Categories).await
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let term = query.q.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return Err(ApiError::Validation("query parameter 'q' is required".into()));
    }
    fetch(&state, Resource::Search(term.to_string())).await
}

pub async fn home(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    fetch(&state, Resource::Home).await
}
