use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Method,
    header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT},
};
use tracing::info;

use super::{SendError, Sender};
use crate::models::{
    notification::{Channel, Notification},
    payload::WebhookPayload,
};

const USER_AGENT_TAG: &str = "notify-service/0.1.0";
const RESPONSE_PREVIEW_BYTES: usize = 1024;

/// Delivers webhook payloads over HTTP. Only re-delivery-safe methods are
/// accepted; the payload may narrow the request timeout below the configured
/// default, up to a ceiling.
pub struct WebhookSender {
    client: Client,
    default_timeout: Duration,
    timeout_ceiling: Duration,
}

impl WebhookSender {
    pub fn new(default_timeout: Duration, timeout_ceiling: Duration) -> Self {
        Self {
            client: Client::new(),
            default_timeout,
            timeout_ceiling,
        }
    }
}

#[async_trait]
impl Sender for WebhookSender {
    fn supports(&self, channel: Channel) -> bool {
        channel == Channel::Webhook
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let payload = WebhookPayload::parse(&notification.payload)
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?;

        let method = match payload
            .resolved_method()
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?
        {
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            _ => Method::POST,
        };

        let timeout = payload
            .timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.timeout_ceiling);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_TAG));
        headers.insert(
            HeaderName::from_static("x-notify-notification-id"),
            HeaderValue::from_str(&notification.id.to_string())
                .map_err(|_| SendError::Provider("failed to build tracking headers".to_string()))?,
        );
        headers.insert(
            HeaderName::from_static("x-notify-tenant-id"),
            HeaderValue::from_str(&notification.tenant_id.to_string())
                .map_err(|_| SendError::Provider("failed to build tracking headers".to_string()))?,
        );

        // Caller headers win over the defaults.
        for (name, value) in &payload.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SendError::InvalidPayload(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SendError::InvalidPayload(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let response = self
            .client
            .request(method, payload.url.as_str())
            .json(&payload.body)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("webhook request failed: {e}")))?;

        let status = response.status();
        let preview: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(RESPONSE_PREVIEW_BYTES)
            .collect();

        if !status.is_success() {
            return Err(SendError::Provider(format!(
                "webhook returned status {}: {preview}",
                status.as_u16()
            )));
        }

        info!(
            notification_id = %notification.id,
            url = %payload.url,
            status = status.as_u16(),
            response_preview = %preview,
            "Webhook delivered"
        );

        Ok(())
    }
}
