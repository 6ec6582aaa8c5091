//! Application setup and server configuration.

use std::time::Duration;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::ServerDeps;
use crate::server::routes::{cache, health, jobs, research, stream};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
}

/// Build the Axum application router
pub fn build_app(deps: ServerDeps, allowed_origins: &[String]) -> Router {
    let state = AppState { deps };

    // SSE streams stay open for the life of a job, so the request timeout
    // applies to everything else.
    let api = Router::new()
        .route("/research/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/research/jobs/:id", get(jobs::get_job))
        .route("/research/jobs/:id/drafts", get(jobs::list_drafts))
        .route("/research/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/research/jobs/:id/events", get(jobs::job_events))
        .route("/research/:id", get(research::get_research))
        .route("/cache", delete(cache::clear_all))
        .route("/cache/domains", get(cache::list_domains))
        .route("/cache/domains/:domain", delete(cache::clear_domain))
        .route("/cache/domains/:domain/entries", get(cache::list_entries))
        .route("/cache/domains/:domain/refetch", post(cache::refetch_domain))
        .route("/cache/refetch", post(cache::refetch_url))
        .route("/health", get(health::health_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(120)));

    Router::new()
        .route("/research/jobs/:id/stream", get(stream::stream_handler))
        .merge(api)
        .layer(Extension(state))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}
