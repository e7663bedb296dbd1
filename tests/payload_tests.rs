use notify_service::api::notifications::{clamp_limit, clamp_offset};
use notify_service::models::payload::{EmailPayload, SmsPayload, WebhookPayload};
use serde_json::json;

/// Test: Complete email payloads parse
#[test]
fn test_email_payload_valid() {
    let payload = EmailPayload::parse(&json!({
        "to": "a@example.com",
        "subject": "hello",
        "body": "world",
    }))
    .expect("payload should parse");

    assert_eq!(payload.to, "a@example.com");
}

/// Test: Email payloads with missing or empty fields are rejected
#[test]
fn test_email_payload_missing_fields() {
    let missing_to = EmailPayload::parse(&json!({"subject": "s", "body": "b"}));
    assert!(missing_to.is_err());

    let empty_subject =
        EmailPayload::parse(&json!({"to": "a@example.com", "subject": "", "body": "b"}));
    assert!(empty_subject.unwrap_err().to_string().contains("subject"));

    let empty_body =
        EmailPayload::parse(&json!({"to": "a@example.com", "subject": "s", "body": "  "}));
    assert!(empty_body.is_err());
}

/// Test: SMS payloads require phone number and message
#[test]
fn test_sms_payload_validation() {
    assert!(SmsPayload::parse(&json!({"phone_number": "+15550100", "message": "hi"})).is_ok());
    assert!(SmsPayload::parse(&json!({"message": "hi"})).is_err());
    assert!(SmsPayload::parse(&json!({"phone_number": "", "message": "hi"})).is_err());
    assert!(SmsPayload::parse(&json!({"phone_number": "+15550100", "message": ""})).is_err());
}

/// Test: Webhook method defaults to POST
#[test]
fn test_webhook_method_defaults_to_post() {
    let payload = WebhookPayload::parse(&json!({"url": "https://example.com/hook"}))
        .expect("payload should parse");

    assert_eq!(payload.resolved_method().unwrap(), "POST");
}

/// Test: Webhook accepts only re-delivery-safe methods
#[test]
fn test_webhook_method_allow_list() {
    for method in ["POST", "PUT", "PATCH"] {
        let payload = WebhookPayload::parse(&json!({
            "url": "https://example.com/hook",
            "method": method,
        }));
        assert!(payload.is_ok(), "{method} should be accepted");
    }

    for method in ["GET", "DELETE", "HEAD", "post"] {
        let payload = WebhookPayload::parse(&json!({
            "url": "https://example.com/hook",
            "method": method,
        }));
        assert!(payload.is_err(), "{method} should be rejected");
    }
}

/// Test: Webhook payload requires a url
#[test]
fn test_webhook_requires_url() {
    assert!(WebhookPayload::parse(&json!({"method": "POST"})).is_err());
    assert!(WebhookPayload::parse(&json!({"url": ""})).is_err());
}

/// Test: Webhook optional fields default sensibly
#[test]
fn test_webhook_optional_fields() {
    let payload = WebhookPayload::parse(&json!({"url": "https://example.com/hook"}))
        .expect("payload should parse");

    assert!(payload.headers.is_empty());
    assert!(payload.timeout_sec.is_none());
    assert!(payload.body.is_null());

    let payload = WebhookPayload::parse(&json!({
        "url": "https://example.com/hook",
        "headers": {"x-signature": "abc"},
        "body": {"k": "v"},
        "timeout_sec": 5,
    }))
    .expect("payload should parse");

    assert_eq!(payload.timeout_sec, Some(5));
    assert_eq!(payload.headers.get("x-signature").map(String::as_str), Some("abc"));
}

/// Test: Pagination limit outside [1, 100] falls back to the default
#[test]
fn test_limit_clamping() {
    assert_eq!(clamp_limit(None), 20);
    assert_eq!(clamp_limit(Some(0)), 20);
    assert_eq!(clamp_limit(Some(-3)), 20);
    assert_eq!(clamp_limit(Some(101)), 20);
    assert_eq!(clamp_limit(Some(1)), 1);
    assert_eq!(clamp_limit(Some(100)), 100);
    assert_eq!(clamp_limit(Some(42)), 42);
}

/// Test: Negative offsets clamp to zero
#[test]
fn test_offset_clamping() {
    assert_eq!(clamp_offset(None), 0);
    assert_eq!(clamp_offset(Some(-1)), 0);
    assert_eq!(clamp_offset(Some(0)), 0);
    assert_eq!(clamp_offset(Some(250)), 250);
}
