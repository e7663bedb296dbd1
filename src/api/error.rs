use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// RFC 7807 problem document. Provider and storage error text never leaks
/// into `detail`.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("duplicate request in flight")]
    IdempotencyConflict,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("queue bridge enqueue failed")]
    Bridge,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, title, detail) = match self {
            ApiError::Validation(detail) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "Invalid request",
                detail,
            ),
            ApiError::IdempotencyConflict => (
                StatusCode::CONFLICT,
                "duplicate_request",
                "Request is already being processed",
                "Another request with this idempotency key is in progress".to_string(),
            ),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", "Not found", detail),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "conflict", "Conflict", detail),
            ApiError::Bridge => (
                StatusCode::BAD_GATEWAY,
                "enqueue_error",
                "Failed to enqueue notification",
                "The notification was recorded but could not be enqueued; retry the request"
                    .to_string(),
            ),
            ApiError::Database(e) => {
                error!(error = %e, "Database error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Storage unavailable",
                    "The request could not be durably recorded; please retry".to_string(),
                )
            }
        };

        problem_response(status, kind, title, detail)
    }
}

pub fn problem_response(status: StatusCode, kind: &str, title: &str, detail: String) -> Response {
    let body = Json(Problem {
        kind: kind.to_string(),
        title: title.to_string(),
        status: status.as_u16(),
        detail,
    });

    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        body,
    )
        .into_response()
}
