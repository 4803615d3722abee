//! Error types for folio-ingest
//!
//! Lifecycle and dispatch errors stay distinct so callers can tell an
//! out-of-order callback (illegal transition) from a transient send failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::UnitStatus;

/// Unit lifecycle error
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Current status is not a legal predecessor of the requested one
    #[error("Illegal transition for unit {unit_id}: {from} -> {to}")]
    IllegalTransition {
        unit_id: Uuid,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("Unit not found: {0}")]
    UnitNotFound(Uuid),

    /// Compare-and-swap kept losing against concurrent writers
    #[error("Concurrent modification of unit {0}")]
    Conflict(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] folio_common::Error),
}

/// Outbound message queue error
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue endpoint unreachable or closed
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Queue answered with a non-success status
    #[error("Queue rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Dispatch error for a single unit
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Unit {0} is already completed")]
    AlreadyCompleted(Uuid),

    /// Another dispatch of the same unit is running, or the unit is with a worker
    #[error("Unit {0} is already in flight")]
    InFlight(Uuid),

    /// FAILED with the retry budget spent; only an explicit single-unit publish revives it
    #[error("Unit {0} has exhausted its retries")]
    RetriesExhausted(Uuid),

    /// Parent groups are containers and never analyzed
    #[error("Unit {0} is not analyzable")]
    NotAnalyzable(Uuid),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Store error: {0}")]
    Store(#[from] folio_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. illegal lifecycle transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// folio-common error
    #[error("Common error: {0}")]
    Common(#[from] folio_common::Error),
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::UnitNotFound(id) => ApiError::NotFound(format!("Unit not found: {}", id)),
            LifecycleError::IllegalTransition { .. } | LifecycleError::Conflict(_) => {
                ApiError::Conflict(err.to_string())
            }
            LifecycleError::Store(e) => ApiError::Common(e),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Lifecycle(e) => e.into(),
            DispatchError::Store(e) => ApiError::Common(e),
            DispatchError::AlreadyCompleted(_)
            | DispatchError::InFlight(_)
            | DispatchError::RetriesExhausted(_)
            | DispatchError::NotAnalyzable(_) => ApiError::Conflict(err.to_string()),
            DispatchError::Queue(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(folio_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(folio_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
