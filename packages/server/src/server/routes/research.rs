use axum::{
    extract::{Extension, Path},
    Json,
};
use research_pipeline::ResearchReport;
use uuid::Uuid;

use crate::server::app::AppState;
use crate::server::error::ApiError;

/// GET /research/:id
pub async fn get_research(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResearchReport>, ApiError> {
    Ok(Json(state.deps.registry.research(id).await?))
}
