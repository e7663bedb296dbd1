use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Router, http::HeaderMap, http::StatusCode, routing::post};
use chrono::Utc;
use notify_service::{
    models::notification::{Channel, Notification, NotificationStatus},
    senders::{SendError, Sender, WebhookSender},
};
use serde_json::json;
use uuid::Uuid;

fn webhook_notification(payload: serde_json::Value) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        channel: Channel::Webhook,
        payload,
        status: NotificationStatus::Processing,
        attempt: 0,
        error_message: None,
        next_retry_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Spawn an in-process receiver that records request headers and answers
/// with a fixed status and body.
async fn spawn_receiver(
    status: StatusCode,
    body: &'static str,
) -> (SocketAddr, Arc<Mutex<Option<HeaderMap>>>) {
    let captured = Arc::new(Mutex::new(None));
    let captured_handler = Arc::clone(&captured);

    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap| {
            let captured = Arc::clone(&captured_handler);
            async move {
                *captured.lock().unwrap() = Some(headers);
                (status, body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, captured)
}

fn sender() -> WebhookSender {
    WebhookSender::new(Duration::from_secs(5), Duration::from_secs(10))
}

/// Test: Successful delivery carries tracking and caller headers
#[tokio::test]
async fn test_delivery_sets_headers() {
    let (addr, captured) = spawn_receiver(StatusCode::OK, "ok").await;

    let notification = webhook_notification(json!({
        "url": format!("http://{addr}/hook"),
        "headers": {"x-signature": "sig-1"},
        "body": {"event": "ping"},
    }));

    sender()
        .send(&notification)
        .await
        .expect("delivery should succeed");

    let headers = captured.lock().unwrap().take().expect("request received");
    assert_eq!(
        headers.get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(
        headers
            .get("x-notify-notification-id")
            .and_then(|v| v.to_str().ok()),
        Some(notification.id.to_string().as_str())
    );
    assert_eq!(
        headers
            .get("x-notify-tenant-id")
            .and_then(|v| v.to_str().ok()),
        Some(notification.tenant_id.to_string().as_str())
    );
    assert_eq!(
        headers.get("x-signature").and_then(|v| v.to_str().ok()),
        Some("sig-1")
    );
    assert!(headers.get("user-agent").is_some());
}

/// Test: Non-2xx responses fail with the body captured for diagnostics
#[tokio::test]
async fn test_non_2xx_is_provider_failure() {
    let (addr, _captured) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR, "kaboom").await;

    let notification = webhook_notification(json!({
        "url": format!("http://{addr}/hook"),
    }));

    let err = sender()
        .send(&notification)
        .await
        .expect_err("5xx must be a failure");

    match err {
        SendError::Provider(message) => {
            assert!(message.contains("500"), "status should be captured: {message}");
            assert!(message.contains("kaboom"), "body should be captured: {message}");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

/// Test: Status 299 is success, status 300 is failure
#[tokio::test]
async fn test_2xx_boundary() {
    let (addr, _) = spawn_receiver(StatusCode::from_u16(299).unwrap(), "edge").await;
    let notification = webhook_notification(json!({"url": format!("http://{addr}/hook")}));
    assert!(sender().send(&notification).await.is_ok());

    let (addr, _) = spawn_receiver(StatusCode::from_u16(300).unwrap(), "edge").await;
    let notification = webhook_notification(json!({"url": format!("http://{addr}/hook")}));
    let err = sender().send(&notification).await.expect_err("300 is failure");
    assert!(matches!(err, SendError::Provider(_)));
}

/// Test: A rejected method never reaches the network
#[tokio::test]
async fn test_rejected_method_is_validation_error() {
    // Nothing listens on this address; a validation failure must short-circuit
    // before any connection attempt.
    let notification = webhook_notification(json!({
        "url": "http://127.0.0.1:1/hook",
        "method": "GET",
    }));

    let err = sender()
        .send(&notification)
        .await
        .expect_err("GET must be rejected");

    assert!(matches!(err, SendError::InvalidPayload(_)));
}

/// Test: Malformed payloads are validation errors
#[tokio::test]
async fn test_missing_url_is_validation_error() {
    let notification = webhook_notification(json!({"method": "POST"}));

    let err = sender().send(&notification).await.expect_err("url required");

    assert!(matches!(err, SendError::InvalidPayload(_)));
}
