use std::collections::HashMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Payload shapes are opaque at acceptance time; each sender parses and
/// validates its own shape immediately before the provider call.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| anyhow!("malformed email payload: {e}"))?;

        if parsed.to.trim().is_empty() {
            return Err(anyhow!("email payload missing 'to' field"));
        }
        if parsed.subject.trim().is_empty() {
            return Err(anyhow!("email payload missing 'subject' field"));
        }
        if parsed.body.trim().is_empty() {
            return Err(anyhow!("email payload missing 'body' field"));
        }

        Ok(parsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsPayload {
    pub phone_number: String,
    pub message: String,
}

impl SmsPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| anyhow!("malformed sms payload: {e}"))?;

        if parsed.phone_number.trim().is_empty() {
            return Err(anyhow!("sms payload missing 'phone_number' field"));
        }
        if parsed.message.trim().is_empty() {
            return Err(anyhow!("sms payload missing 'message' field"));
        }

        Ok(parsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: JsonValue,

    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

impl WebhookPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        let parsed: Self = serde_json::from_value(payload.clone())
            .map_err(|e| anyhow!("malformed webhook payload: {e}"))?;

        if parsed.url.trim().is_empty() {
            return Err(anyhow!("webhook payload missing 'url' field"));
        }

        // Only methods safe to re-deliver are accepted.
        parsed.resolved_method()?;

        Ok(parsed)
    }

    /// The HTTP method to use, defaulting to POST.
    pub fn resolved_method(&self) -> Result<&'static str> {
        match self.method.as_deref() {
            None | Some("POST") => Ok("POST"),
            Some("PUT") => Ok("PUT"),
            Some("PATCH") => Ok("PATCH"),
            Some(other) => Err(anyhow!(
                "webhook method not supported: {other} (only POST, PUT, PATCH)"
            )),
        }
    }
}
