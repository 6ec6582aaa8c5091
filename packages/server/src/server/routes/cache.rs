//! Content cache administration.

use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use research_pipeline::cache::CachedBody;
use research_pipeline::{CacheEntry, DomainRollup, FetchOptions, RefetchSummary};
use serde::{Deserialize, Serialize};

use crate::server::app::AppState;
use crate::server::error::ApiError;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct RefetchUrlRequest {
    pub url: String,
    pub ttl_hours: Option<u32>,
    #[serde(default)]
    pub force_bypass: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefetchDomainRequest {
    pub limit: usize,
    pub ttl_hours: Option<u32>,
    #[serde(default)]
    pub force_bypass: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct RefetchResponse {
    #[serde(flatten)]
    pub entry: CacheEntry,
    pub from_cache: bool,
    pub revalidated: bool,
}

impl From<CachedBody> for RefetchResponse {
    fn from(body: CachedBody) -> Self {
        Self {
            entry: body.entry,
            from_cache: body.from_cache,
            revalidated: body.revalidated,
        }
    }
}

fn fetch_options(state: &AppState, ttl_hours: Option<u32>, force_bypass: bool) -> FetchOptions {
    let fetch = &state.deps.orchestrator.defaults().fetch;
    FetchOptions {
        ttl_hours: ttl_hours.unwrap_or(fetch.cache_ttl_hours),
        force_bypass,
        per_domain_rps: fetch.per_domain_rps,
        timeout: Duration::from_secs(fetch.fetch_timeout_secs),
    }
}

/// GET /cache/domains
pub async fn list_domains(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<DomainRollup>>, ApiError> {
    Ok(Json(state.deps.cache.list_domains().await?))
}

/// GET /cache/domains/:domain/entries?limit=&offset=
pub async fn list_entries(
    Extension(state): Extension<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<Vec<CacheEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    Ok(Json(
        state
            .deps
            .cache
            .list_entries(&domain, limit, query.offset)
            .await?,
    ))
}

/// DELETE /cache/domains/:domain
pub async fn clear_domain(
    Extension(state): Extension<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state.deps.cache.clear_domain(&domain).await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// DELETE /cache
pub async fn clear_all(
    Extension(state): Extension<AppState>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state.deps.cache.clear_all().await?;
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /cache/refetch
pub async fn refetch_url(
    Extension(state): Extension<AppState>,
    Json(req): Json<RefetchUrlRequest>,
) -> Result<Json<RefetchResponse>, ApiError> {
    let opts = fetch_options(&state, req.ttl_hours, req.force_bypass);
    let body = state.deps.cache.refetch_url(&req.url, &opts).await?;
    Ok(Json(body.into()))
}

/// POST /cache/domains/:domain/refetch
pub async fn refetch_domain(
    Extension(state): Extension<AppState>,
    Path(domain): Path<String>,
    Json(req): Json<RefetchDomainRequest>,
) -> Result<Json<RefetchSummary>, ApiError> {
    let opts = fetch_options(&state, req.ttl_hours, req.force_bypass);
    let summary = state
        .deps
        .cache
        .refetch_domain(&domain, req.limit.min(MAX_PAGE_SIZE), &opts)
        .await?;
    Ok(Json(summary))
}
