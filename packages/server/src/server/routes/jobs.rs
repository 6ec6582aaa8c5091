//! Job control endpoints.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use research_pipeline::{Draft, Job, JobEvent, JobId, JobStatus, ServerType, StartJob};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::app::AppState;
use crate::server::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub query: String,
    pub server_name: String,
    pub model_name: String,
    pub server_type: ServerType,
    pub target_count: u32,
    #[serde(default)]
    pub seed_urls: Vec<String>,
    #[serde(default)]
    pub focus_on_seed: bool,
    pub config: Option<Value>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl From<CreateJobRequest> for StartJob {
    fn from(req: CreateJobRequest) -> Self {
        StartJob {
            query: req.query,
            target_count: req.target_count,
            seed_urls: req.seed_urls,
            focus_on_seed: req.focus_on_seed,
            server_type: req.server_type,
            server_name: req.server_name,
            model_name: req.model_name,
            config: req.config,
            start_date: req.start_date,
            end_date: req.end_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cancel_requested: bool,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

/// POST /research/jobs
pub async fn create_job(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let job_id = state.deps.orchestrator.start(req.into()).await?;
    Ok((StatusCode::ACCEPTED, Json(CreateJobResponse { job_id })))
}

/// GET /research/jobs
pub async fn list_jobs(Extension(state): Extension<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.deps.registry.list().await?))
}

/// GET /research/jobs/:id
pub async fn get_job(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.deps.registry.get(id).await?))
}

/// GET /research/jobs/:id/drafts
pub async fn list_drafts(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<Vec<Draft>>, ApiError> {
    Ok(Json(state.deps.registry.drafts(id).await?))
}

/// POST /research/jobs/:id/cancel
pub async fn cancel_job(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job = state.deps.registry.cancel(id).await?;
    Ok(Json(CancelResponse {
        job_id: job.id,
        status: job.status,
        cancel_requested: job.cancel_requested,
    }))
}

/// GET /research/jobs/:id/events?since=N
///
/// Buffered events with `seq > since`, for clients that poll instead of
/// holding a stream open.
pub async fn job_events(
    Extension(state): Extension<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<JobEvent>>, ApiError> {
    state.deps.registry.get(id).await?;
    Ok(Json(state.deps.registry.events().since(id, query.since).await))
}
