use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::database::Store,
    models::notification::{DeadLetter, Notification, NotificationStatus},
    senders::{ChannelRouter, SendError},
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub circuit_open_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            circuit_open_retry_delay: Duration::from_secs(30),
        }
    }
}

/// The slice of the store the delivery loop needs.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn claim_due_pending(&self, limit: i64) -> Result<Vec<Notification>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        attempt: i32,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn move_to_dead_letter(
        &self,
        notification: &Notification,
        attempts: i32,
        last_error: &str,
    ) -> Result<Option<DeadLetter>>;
}

#[async_trait]
impl DeliveryStore for Store {
    async fn claim_due_pending(&self, limit: i64) -> Result<Vec<Notification>> {
        Store::claim_due_pending(self, limit)
            .await
            .context("claim due pending notifications")
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        attempt: i32,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        Store::update_status(self, id, status, attempt, error_message, next_retry_at)
            .await
            .context("update notification status")
    }

    async fn move_to_dead_letter(
        &self,
        notification: &Notification,
        attempts: i32,
        last_error: &str,
    ) -> Result<Option<DeadLetter>> {
        Store::move_to_dead_letter(self, notification, attempts, last_error)
            .await
            .context("move notification to dead letter queue")
    }
}

/// Deterministic, bounded retry delay keyed only by the attempt number.
pub fn backoff_delay(attempt: i32) -> chrono::Duration {
    match attempt {
        ..=1 => chrono::Duration::minutes(1),
        2 => chrono::Duration::minutes(5),
        _ => chrono::Duration::minutes(15),
    }
}

/// Background delivery loop: claims due pending rows, routes each through the
/// senders, and applies the retry / dead-letter policy.
pub struct Worker<S> {
    store: S,
    router: Arc<ChannelRouter>,
    config: WorkerConfig,
}

impl<S: DeliveryStore> Worker<S> {
    pub fn new(store: S, router: Arc<ChannelRouter>, config: WorkerConfig) -> Self {
        Self {
            store,
            router,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Worker started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Worker tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Worker stopping");
    }

    /// One polling tick. Returns how many notifications were picked up.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self.store.claim_due_pending(self.config.batch_size).await?;

        if batch.is_empty() {
            return Ok(0);
        }

        debug!(count = batch.len(), "Claimed due notifications");

        let count = batch.len();
        for notification in batch {
            self.deliver(notification).await;
        }

        Ok(count)
    }

    /// Deliver one claimed notification and record the outcome. Also invoked
    /// by the queue-bridge consumer for rows it has claimed.
    pub async fn deliver(&self, notification: Notification) {
        match self.router.send(&notification).await {
            Ok(()) => {
                let new_attempt = notification.attempt + 1;
                match self
                    .store
                    .update_status(
                        notification.id,
                        NotificationStatus::Sent,
                        new_attempt,
                        None,
                        None,
                    )
                    .await
                {
                    Ok(_) => info!(
                        notification_id = %notification.id,
                        channel = %notification.channel,
                        attempt = new_attempt,
                        "Notification sent"
                    ),
                    Err(e) => error!(
                        error = %e,
                        notification_id = %notification.id,
                        "Failed to record sent status"
                    ),
                }
            }

            Err(e @ SendError::CircuitOpen(_)) => {
                // The provider is known-unhealthy; defer without consuming an
                // attempt so an outage cannot dead-letter traffic on its own.
                let delay = chrono::Duration::from_std(self.config.circuit_open_retry_delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
                let next_retry_at = Utc::now() + delay;

                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    next_retry_at = %next_retry_at,
                    "Circuit open, deferring notification"
                );

                if let Err(store_err) = self
                    .store
                    .update_status(
                        notification.id,
                        NotificationStatus::Pending,
                        notification.attempt,
                        Some(&e.to_string()),
                        Some(next_retry_at),
                    )
                    .await
                {
                    error!(
                        error = %store_err,
                        notification_id = %notification.id,
                        "Failed to defer notification"
                    );
                }
            }

            Err(e) if e.is_fatal() => {
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    error = %e,
                    "Unrecoverable send fault, dead-lettering"
                );
                self.dead_letter(&notification, notification.attempt + 1, &e.to_string())
                    .await;
            }

            Err(e) => {
                let new_attempt = notification.attempt + 1;
                let error_text = e.to_string();

                if new_attempt >= self.config.max_attempts {
                    self.dead_letter(&notification, new_attempt, &error_text).await;
                } else {
                    let next_retry_at = Utc::now() + backoff_delay(new_attempt);

                    warn!(
                        notification_id = %notification.id,
                        channel = %notification.channel,
                        attempt = new_attempt,
                        next_retry_at = %next_retry_at,
                        error = %error_text,
                        "Send failed, scheduling retry"
                    );

                    if let Err(store_err) = self
                        .store
                        .update_status(
                            notification.id,
                            NotificationStatus::Pending,
                            new_attempt,
                            Some(&error_text),
                            Some(next_retry_at),
                        )
                        .await
                    {
                        error!(
                            error = %store_err,
                            notification_id = %notification.id,
                            "Failed to schedule retry"
                        );
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, notification: &Notification, attempts: i32, last_error: &str) {
        match self
            .store
            .move_to_dead_letter(notification, attempts, last_error)
            .await
        {
            Ok(Some(dead_letter)) => info!(
                notification_id = %notification.id,
                dlq_id = %dead_letter.id,
                attempts,
                "Notification moved to dead letter queue"
            ),
            Ok(None) => debug!(
                notification_id = %notification.id,
                "Notification already terminal, skipping dead-letter"
            ),
            Err(e) => error!(
                error = %e,
                notification_id = %notification.id,
                "Failed to move notification to dead letter queue"
            ),
        }
    }
}
