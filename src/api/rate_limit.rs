use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::{AppState, error::problem_response};
use crate::clients::rate_limit::RateLimitDecision;

/// Sliding-window admission control per tenant (preferred) or client IP.
/// When the limiter backend is unreachable the request is admitted.
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = &state.limiter else {
        return next.run(request).await;
    };

    let key = derive_key(&request);

    let decision = match limiter.allow(&key).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(error = %e, key = %key, "Rate limit check failed, admitting request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        let retry_after = (decision.reset_at - chrono::Utc::now()).num_seconds().max(0);

        let mut response = problem_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            "Too Many Requests",
            "Rate limit exceeded. Please retry after the indicated delay.".to_string(),
        );
        set_rate_limit_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));

        return response;
    }

    let mut response = next.run(request).await;
    set_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn set_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at.timestamp()),
    );
}

/// `X-Tenant-ID` header first, then the `tenant_id` query field, then the
/// client address.
pub fn derive_key(request: &Request) -> String {
    if let Some(tenant) = request
        .headers()
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        && !tenant.is_empty()
    {
        return format!("tenant:{tenant}");
    }

    if let Some(query) = request.uri().query()
        && let Some(tenant) = query_param(query, "tenant_id")
    {
        return format!("tenant:{tenant}");
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!("ip:{ip}")
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
