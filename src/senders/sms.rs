use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use tracing::info;

use super::{SendError, Sender};
use crate::models::{
    notification::{Channel, Notification},
    payload::SmsPayload,
};

/// Delivers SMS payloads through AWS SNS.
pub struct SmsSender {
    client: SnsClient,
}

impl SmsSender {
    pub async fn new(region: String) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;

        Self {
            client: SnsClient::new(&sdk_config),
        }
    }
}

#[async_trait]
impl Sender for SmsSender {
    fn supports(&self, channel: Channel) -> bool {
        channel == Channel::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let payload = SmsPayload::parse(&notification.payload)
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?;

        let output = self
            .client
            .publish()
            .phone_number(payload.phone_number.as_str())
            .message(payload.message.as_str())
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("sns publish failed: {e}")))?;

        info!(
            notification_id = %notification.id,
            phone_number = %payload.phone_number,
            message_id = output.message_id().unwrap_or("unknown"),
            "SMS published via SNS"
        );

        Ok(())
    }
}
