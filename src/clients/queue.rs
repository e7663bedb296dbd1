use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use lapin::{
    BasicProperties, Channel as AmqpChannel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use crate::{
    models::{notification::Notification, retry::RetryConfig},
    utils::retry_with_backoff,
};

/// Wire shape for the optional broker dispatch path. The store remains the
/// source of truth; this message only carries enough to locate the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub notification_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub channel: String,
    pub payload: JsonValue,
    pub attempt: i32,
    pub enqueued_at: i64,
}

impl From<&Notification> for QueueMessage {
    fn from(notification: &Notification) -> Self {
        Self {
            notification_id: notification.id,
            tenant_id: notification.tenant_id,
            user_id: notification.user_id,
            channel: notification.channel.to_string(),
            payload: notification.payload.clone(),
            attempt: notification.attempt,
            enqueued_at: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Clone)]
pub struct QueueBridge {
    channel: AmqpChannel,
    queue_name: String,
    retry_config: RetryConfig,
}

impl QueueBridge {
    pub async fn connect(amqp_url: &str, queue_name: &str) -> Result<Self, Error> {
        info!("Connecting to AMQP broker");

        let connection = Connection::connect(amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to AMQP broker: {e}"))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("AMQP channel creation failed"))?;

        channel
            .basic_qos(10, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to declare notification queue"))?;

        info!(queue = %queue_name, "AMQP queue declared");

        Ok(Self {
            channel,
            queue_name: queue_name.to_string(),
            retry_config: RetryConfig::default(),
        })
    }

    pub async fn publish(&self, notification: &Notification) -> Result<(), Error> {
        let message = QueueMessage::from(notification);
        let payload = serde_json::to_vec(&message)?;

        retry_with_backoff(&self.retry_config, || {
            let channel = self.channel.clone();
            let queue_name = self.queue_name.clone();
            let payload = payload.clone();

            async move {
                channel
                    .basic_publish(
                        "",
                        &queue_name,
                        BasicPublishOptions::default(),
                        &payload,
                        BasicProperties::default().with_delivery_mode(2),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<_, String>(())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to publish notification to queue: {e}"))?;

        Ok(())
    }

    pub async fn create_consumer(&self, consumer_tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        info!(queue = %self.queue_name, "Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }
}
