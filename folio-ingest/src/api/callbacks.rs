//! Worker callback handlers
//!
//! POST /callbacks/completion, POST /callbacks/status
//!
//! Out-of-order or duplicate callbacks answer 409 and leave the unit
//! untouched.

use axum::{extract::State, routing::post, Json, Router};

use crate::{
    error::ApiResult,
    models::{CompletionCallback, NarrativeUnit, StatusUpdateCallback},
    AppState,
};

pub async fn completion_callback(
    State(state): State<AppState>,
    Json(callback): Json<CompletionCallback>,
) -> ApiResult<Json<NarrativeUnit>> {
    Ok(Json(state.callbacks.handle_completion(callback).await?))
}

pub async fn status_callback(
    State(state): State<AppState>,
    Json(update): Json<StatusUpdateCallback>,
) -> ApiResult<Json<NarrativeUnit>> {
    Ok(Json(state.callbacks.handle_status_update(update).await?))
}

/// Build worker callback routes
pub fn callback_routes() -> Router<AppState> {
    Router::new()
        .route("/callbacks/completion", post(completion_callback))
        .route("/callbacks/status", post(status_callback))
}
