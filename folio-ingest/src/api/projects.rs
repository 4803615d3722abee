//! Project, manuscript and dispatch handlers
//!
//! POST /projects, GET /projects/:id, GET /projects/:id/units,
//! GET /projects/:id/progress, GET /projects/:id/failed,
//! POST /projects/:id/groups, POST /projects/:id/manuscripts,
//! POST /projects/:id/publish, GET /units/:id, POST /units/:id/publish

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{Manuscript, NarrativeUnit, Project, ProjectProgress, PublishReport},
    services::load_progress,
    AppState,
};

/// POST /projects and POST /projects/:id/groups request
#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

/// POST /projects/:id/manuscripts response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub project_id: Uuid,
    pub generation: u32,
    pub units: Vec<NarrativeUnit>,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<TitleRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state.ingestor.create_project(&request.title).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    require_project(&state, project_id).await.map(Json)
}

/// GET /projects/:id/units
///
/// Every unit of the project in ordinal order, groups included.
pub async fn list_units(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<NarrativeUnit>>> {
    require_project(&state, project_id).await?;
    Ok(Json(state.units.list_for_project(project_id).await?))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<ProjectProgress>> {
    let progress = load_progress(
        state.units.as_ref(),
        state.projects.as_ref(),
        project_id,
        state.config.max_retry_count,
    )
    .await?;
    Ok(Json(progress))
}

/// GET /projects/:id/failed
///
/// Units that failed with no retries left. They stay FAILED until re-published
/// by hand.
pub async fn list_exhausted(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<NarrativeUnit>>> {
    require_project(&state, project_id).await?;
    let units = state
        .units
        .list_exhausted(project_id, state.config.max_retry_count)
        .await?;
    Ok(Json(units))
}

pub async fn create_group(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<TitleRequest>,
) -> ApiResult<(StatusCode, Json<NarrativeUnit>)> {
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Group title must not be empty".to_string()));
    }
    let group = state.ingestor.create_group(project_id, &request.title).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// POST /projects/:id/manuscripts
///
/// Segments the text into units. Nothing is dispatched until the project is
/// published.
pub async fn ingest_manuscript(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(manuscript): Json<Manuscript>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let units = state.ingestor.ingest_manuscript(project_id, manuscript).await?;
    let project = require_project(&state, project_id).await?;

    tracing::info!(
        project_id = %project_id,
        units = units.len(),
        generation = project.generation,
        "Manuscript accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            project_id,
            generation: project.generation,
            units,
        }),
    ))
}

pub async fn publish_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<PublishReport>> {
    Ok(Json(state.dispatcher.publish_for_project(project_id).await?))
}

pub async fn get_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> ApiResult<Json<NarrativeUnit>> {
    Ok(Json(state.lifecycle.load(unit_id).await?))
}

/// POST /units/:id/publish
///
/// Targeted re-analysis of one unit. A FAILED unit is reset for retry first,
/// even when its retries are exhausted.
pub async fn publish_unit(
    State(state): State<AppState>,
    Path(unit_id): Path<Uuid>,
) -> ApiResult<Json<NarrativeUnit>> {
    Ok(Json(state.dispatcher.publish_for_unit(unit_id).await?))
}

async fn require_project(state: &AppState, project_id: Uuid) -> ApiResult<Project> {
    state
        .projects
        .get(project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project not found: {}", project_id)))
}

/// Build project and unit routes
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/units", get(list_units))
        .route("/projects/:id/progress", get(get_progress))
        .route("/projects/:id/failed", get(list_exhausted))
        .route("/projects/:id/groups", post(create_group))
        .route("/projects/:id/manuscripts", post(ingest_manuscript))
        .route("/projects/:id/publish", post(publish_project))
        .route("/units/:id", get(get_unit))
        .route("/units/:id/publish", post(publish_unit))
}
