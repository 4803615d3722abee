//! Server-Sent Events (SSE) for project progress
//!
//! GET /projects/:id/events registers a subscriber on the project's progress
//! channel. The stream ends when the channel is closed (idle timeout or
//! shutdown).

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use folio_common::sse::progress_sse_stream;
use futures::stream::Stream;
use std::convert::Infallible;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

pub async fn project_event_stream(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if state.projects.get(project_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Project not found: {}", project_id)));
    }

    info!(project_id = %project_id, "New SSE client connected to project progress");
    let rx = state.notifier.subscribe(project_id).await;
    Ok(progress_sse_stream(rx, state.config.heartbeat_interval))
}

/// Build SSE routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/projects/:id/events", get(project_event_stream))
}
