pub mod dlq;
pub mod error;
pub mod notifications;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::json;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    clients::{
        database::Store, idempotency::IdempotencyCache, queue::QueueBridge,
        rate_limit::RateLimiter,
    },
    config::Config,
    senders::ChannelRouter,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub idempotency: Option<IdempotencyCache>,
    pub limiter: Option<RateLimiter>,
    pub bridge: Option<QueueBridge>,
    pub router: Arc<ChannelRouter>,
    pub config: Config,
}

pub fn app_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route(
            "/notifications",
            post(notifications::submit).get(notifications::list),
        )
        .route("/notifications/{id}", get(notifications::get_one))
        .route(
            "/notifications/{id}/status",
            patch(notifications::update_status),
        )
        .route("/dlq", get(dlq::list))
        .route("/dlq/{id}", get(dlq::get_one))
        .route("/dlq/{id}/retry", post(dlq::retry))
        .route("/dlq/{id}/discard", post(dlq::discard))
        .layer(from_fn_with_state(state.clone(), rate_limit::enforce));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Full exposition belongs to the metrics collaborator; this surfaces the
/// breaker statistics for operators.
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "circuit_breakers": state.router.breaker_stats(),
    }))
}
