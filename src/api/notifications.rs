use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{AppState, error::ApiError};
use crate::{
    clients::{
        database::NewNotification,
        idempotency::{IdempotencyCache, IdempotencyCheck, StoredOutcome},
    },
    models::notification::{Channel, Notification, NotificationStatus},
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "x-idempotency-replayed";

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub channel: String,
    pub payload: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub tenant_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub attempt: i32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Out-of-range pagination values fall back to the defaults.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if (1..=100).contains(&l) => l,
        _ => 20,
    }
}

pub fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.filter(|o| *o >= 0).unwrap_or(0)
}

/// POST /v1/notifications
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        body.map_err(|e| ApiError::Validation(format!("malformed JSON body: {e}")))?;

    let tenant_id = Uuid::parse_str(&request.tenant_id)
        .map_err(|_| ApiError::Validation("tenant_id must be a valid UUID".to_string()))?;
    let user_id = Uuid::parse_str(&request.user_id)
        .map_err(|_| ApiError::Validation("user_id must be a valid UUID".to_string()))?;
    let channel: Channel = request.channel.parse().map_err(|_| {
        ApiError::Validation("channel must be one of email, sms, webhook".to_string())
    })?;

    if request.payload.is_null() {
        return Err(ApiError::Validation("payload is required".to_string()));
    }

    let caller_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty());

    // Caller-supplied keys get the long TTL; derived content keys the short
    // one. The cache is best-effort: on error we proceed without idempotency.
    let mut reserved: Option<(String, u64)> = None;
    if let Some(cache) = &state.idempotency {
        let (key, ttl) = match caller_key {
            Some(k) => (k.to_string(), state.config.idempotency_ttl_seconds),
            None => (
                IdempotencyCache::content_key(
                    &tenant_id,
                    &user_id,
                    channel.as_str(),
                    &request.payload,
                ),
                state.config.idempotency_content_ttl_seconds,
            ),
        };

        match cache.check_or_reserve(&request.tenant_id, &key).await {
            Ok(IdempotencyCheck::Hit(outcome)) => {
                info!(
                    tenant_id = %tenant_id,
                    notification_id = %outcome.notification_id,
                    "Idempotent replay"
                );
                return Ok(replay_response(&outcome));
            }
            Ok(IdempotencyCheck::InFlight) => return Err(ApiError::IdempotencyConflict),
            Ok(IdempotencyCheck::Miss) => reserved = Some((key, ttl)),
            Err(e) => {
                warn!(error = %e, "Idempotency check failed, proceeding without");
            }
        }
    }

    let notification = state
        .store
        .create(NewNotification {
            tenant_id,
            user_id,
            channel,
            payload: request.payload,
        })
        .await?;

    if let Some((key, ttl)) = reserved
        && let Some(cache) = &state.idempotency
    {
        let outcome = StoredOutcome {
            notification_id: notification.id,
            status_code: StatusCode::CREATED.as_u16(),
            created_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = cache.store(&request.tenant_id, &key, &outcome, ttl).await {
            warn!(error = %e, "Failed to store idempotency outcome");
        }
    }

    if let Some(bridge) = &state.bridge {
        if let Err(e) = bridge.publish(&notification).await {
            // The pending row stays visible to the polling worker; the caller
            // sees a server error so it may retry (the idempotency cache then
            // replays this outcome instead of creating a duplicate).
            error!(
                error = %e,
                notification_id = %notification.id,
                "Failed to enqueue notification to bridge"
            );
            return Err(ApiError::Bridge);
        }

        info!(notification_id = %notification.id, "Notification enqueued to bridge");
    }

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: notification.id,
        }),
    )
        .into_response())
}

fn replay_response(outcome: &StoredOutcome) -> Response {
    let mut response = (
        StatusCode::OK,
        Json(SubmitResponse {
            id: outcome.notification_id,
        }),
    )
        .into_response();

    response
        .headers_mut()
        .insert(IDEMPOTENCY_REPLAYED_HEADER, HeaderValue::from_static("true"));

    response
}

/// GET /v1/notifications
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

    let notifications = state.store.list_by_tenant(tenant_id, limit, offset).await?;
    let count = notifications.len();

    Ok(Json(json!({
        "data": notifications,
        "limit": limit,
        "offset": offset,
        "count": count,
    }))
    .into_response())
}

/// GET /v1/notifications/{id}
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation("notification id must be a valid UUID".to_string()))?;

    match state.store.get(id).await? {
        Some(notification) => Ok(Json(notification)),
        None => Err(ApiError::NotFound("notification not found".to_string())),
    }
}

/// PATCH /v1/notifications/{id}/status — operator override, restricted to a
/// small allow-list; terminal rows are refused.
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::Validation("notification id must be a valid UUID".to_string()))?;

    let Json(request) =
        body.map_err(|e| ApiError::Validation(format!("malformed JSON body: {e}")))?;

    let status: NotificationStatus = request.status.parse().map_err(|_| {
        ApiError::Validation("status must be one of: pending, processing, sent, failed".to_string())
    })?;

    if status == NotificationStatus::DeadLettered {
        return Err(ApiError::Validation(
            "status must be one of: pending, processing, sent, failed".to_string(),
        ));
    }

    if request.attempt < 0 {
        return Err(ApiError::Validation("attempt must be >= 0".to_string()));
    }

    let updated = state
        .store
        .update_status(id, status, request.attempt, request.error.as_deref(), None)
        .await?;

    if !updated {
        return match state.store.get(id).await? {
            None => Err(ApiError::NotFound("notification not found".to_string())),
            Some(_) => Err(ApiError::Conflict(
                "notification is in a terminal state".to_string(),
            )),
        };
    }

    info!(notification_id = %id, status = %status, attempt = request.attempt, "Notification status updated");

    Ok(Json(json!({
        "id": id,
        "status": status,
    }))
    .into_response())
}
