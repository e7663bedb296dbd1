use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{
    AppState,
    error::ApiError,
    notifications::{ListParams, clamp_limit, clamp_offset},
};
use crate::{
    clients::database::{DiscardDlqOutcome, RetryDlqOutcome},
    models::notification::DeadLetter,
};

/// GET /v1/dlq
pub async fn list(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|_| {
        ApiError::Validation("tenant_id query parameter is required".to_string())
    })?;

    let tenant_id = Uuid::parse_str(&params.tenant_id)
        .map_err(|_| ApiError::Validation("tenant_id must be a valid UUID".to_string()))?;

    let limit = clamp_limit(params.limit);
    let offset = clamp_offset(params.offset);

    let entries = state
        .store
        .list_dlq_by_tenant(tenant_id, limit, offset)
        .await?;
    let count = entries.len();

    Ok(Json(json!({
        "data": entries,
        "limit": limit,
        "offset": offset,
        "count": count,
    }))
    .into_response())
}

/// GET /v1/dlq/{id}
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeadLetter>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation("dead letter id must be a valid UUID".to_string()))?;

    match state.store.get_dlq(id).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(ApiError::NotFound("dead letter entry not found".to_string())),
    }
}

/// POST /v1/dlq/{id}/retry — materialize a fresh pending notification from
/// the entry. Not idempotent: a second call conflicts.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation("dead letter id must be a valid UUID".to_string()))?;

    match state.store.retry_dlq(id).await? {
        RetryDlqOutcome::Retried(notification) => {
            info!(
                dlq_id = %id,
                new_notification_id = %notification.id,
                "Dead letter entry retried"
            );

            Ok(Json(json!({
                "id": id,
                "status": "retried",
                "new_notification_id": notification.id,
            }))
            .into_response())
        }
        RetryDlqOutcome::NotFound => {
            Err(ApiError::NotFound("dead letter entry not found".to_string()))
        }
        RetryDlqOutcome::AlreadyProcessed(status) => Err(ApiError::Conflict(format!(
            "dead letter entry already {status}"
        ))),
    }
}

/// POST /v1/dlq/{id}/discard
pub async fn discard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation("dead letter id must be a valid UUID".to_string()))?;

    match state.store.discard_dlq(id).await? {
        DiscardDlqOutcome::Discarded => {
            info!(dlq_id = %id, "Dead letter entry discarded");

            Ok(Json(json!({
                "id": id,
                "status": "discarded",
            }))
            .into_response())
        }
        DiscardDlqOutcome::NotFound => {
            Err(ApiError::NotFound("dead letter entry not found".to_string()))
        }
        DiscardDlqOutcome::AlreadyProcessed(status) => Err(ApiError::Conflict(format!(
            "dead letter entry already {status}"
        ))),
    }
}
