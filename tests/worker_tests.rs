use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_service::{
    clients::circuit_breaker::CircuitBreaker,
    models::{
        circuit_breaker::CircuitBreakerConfig,
        notification::{Channel, DeadLetter, Notification, NotificationStatus},
    },
    senders::{ChannelRouter, ProtectedSender, SendError, Sender},
    worker::{DeliveryStore, Worker, WorkerConfig, backoff_delay},
};
use serde_json::json;
use uuid::Uuid;

#[derive(Default)]
struct MemoryStore {
    notifications: Mutex<Vec<Notification>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryStore {
    fn insert_pending(&self, channel: Channel, payload: serde_json::Value) -> Uuid {
        let id = Uuid::new_v4();
        self.notifications.lock().unwrap().push(Notification {
            id,
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            channel,
            payload,
            status: NotificationStatus::Pending,
            attempt: 0,
            error_message: None,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    fn get(&self, id: Uuid) -> Notification {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.id == id)
            .expect("notification should exist")
            .clone()
    }

    fn make_due(&self, id: Uuid) {
        let mut notifications = self.notifications.lock().unwrap();
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .expect("notification should exist");
        notification.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
    }

    fn dead_letter_for(&self, id: Uuid) -> Option<DeadLetter> {
        self.dead_letters
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.original_notification_id == id)
            .cloned()
    }
}

#[async_trait]
impl DeliveryStore for &MemoryStore {
    async fn claim_due_pending(&self, limit: i64) -> Result<Vec<Notification>> {
        let now = Utc::now();
        let mut notifications = self.notifications.lock().unwrap();

        let mut due: Vec<&mut Notification> = notifications
            .iter_mut()
            .filter(|n| {
                n.status == NotificationStatus::Pending
                    && n.next_retry_at.is_none_or(|at| at <= now)
            })
            .collect();
        due.sort_by_key(|n| n.created_at);

        let mut claimed = Vec::new();
        for notification in due.into_iter().take(limit as usize) {
            notification.status = NotificationStatus::Processing;
            claimed.push(notification.clone());
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        attempt: i32,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut notifications = self.notifications.lock().unwrap();
        let Some(notification) = notifications.iter_mut().find(|n| n.id == id) else {
            return Ok(false);
        };
        if notification.status.is_terminal() {
            return Ok(false);
        }

        notification.status = status;
        notification.attempt = attempt;
        notification.error_message = error_message.map(str::to_string);
        notification.next_retry_at = next_retry_at;
        notification.updated_at = Utc::now();

        Ok(true)
    }

    async fn move_to_dead_letter(
        &self,
        notification: &Notification,
        attempts: i32,
        last_error: &str,
    ) -> Result<Option<DeadLetter>> {
        let mut notifications = self.notifications.lock().unwrap();
        let Some(row) = notifications.iter_mut().find(|n| n.id == notification.id) else {
            return Ok(None);
        };
        if row.status.is_terminal() {
            return Ok(None);
        }

        row.status = NotificationStatus::DeadLettered;
        row.attempt = attempts;
        row.error_message = Some(last_error.to_string());
        row.next_retry_at = None;

        let dead_letter = DeadLetter {
            id: Uuid::new_v4(),
            original_notification_id: notification.id,
            tenant_id: notification.tenant_id,
            user_id: notification.user_id,
            channel: notification.channel,
            payload: notification.payload.clone(),
            attempts,
            last_error: last_error.to_string(),
            status: notify_service::models::notification::DlqStatus::Pending,
            retried_notification_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.dead_letters.lock().unwrap().push(dead_letter.clone());

        Ok(Some(dead_letter))
    }
}

/// Sender that fails its first `fail_first` calls, then succeeds.
struct FlakySender {
    channel: Channel,
    fail_first: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Sender for FlakySender {
    fn supports(&self, channel: Channel) -> bool {
        channel == self.channel
    }

    async fn send(&self, _notification: &Notification) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(SendError::Provider("provider unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn router_with(sender: FlakySender, max_failures: u32) -> Arc<ChannelRouter> {
    let breaker = Arc::new(CircuitBreaker::new(
        sender.channel.as_str(),
        CircuitBreakerConfig {
            max_failures,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        },
    ));
    Arc::new(ChannelRouter::new(vec![ProtectedSender::new(
        Box::new(sender),
        breaker,
    )]))
}

fn worker_config(max_attempts: i32) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 10,
        max_attempts,
        circuit_open_retry_delay: Duration::from_secs(30),
    }
}

fn email_payload() -> serde_json::Value {
    json!({"to": "a@example.com", "subject": "s", "body": "b"})
}

/// Test: Successful delivery marks the notification sent with one attempt
#[tokio::test]
async fn test_successful_delivery_marks_sent() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let calls = Arc::new(AtomicU32::new(0));
    let router = router_with(
        FlakySender {
            channel: Channel::Email,
            fail_first: 0,
            calls: Arc::clone(&calls),
        },
        5,
    );
    let worker = Worker::new(store.as_ref(), router, worker_config(5));

    let id = store.insert_pending(Channel::Email, email_payload());

    let picked = worker.run_once().await?;
    assert_eq!(picked, 1);

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::Sent);
    assert_eq!(notification.attempt, 1);
    assert!(notification.error_message.is_none());
    assert!(notification.next_retry_at.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "sender called exactly once");

    Ok(())
}

/// Test: A transient failure schedules a retry and a later tick succeeds
#[tokio::test]
async fn test_transient_failure_then_success() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let router = router_with(
        FlakySender {
            channel: Channel::Email,
            fail_first: 1,
            calls: Arc::new(AtomicU32::new(0)),
        },
        5,
    );
    let worker = Worker::new(store.as_ref(), router, worker_config(5));

    let id = store.insert_pending(Channel::Email, email_payload());

    worker.run_once().await?;

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::Pending);
    assert_eq!(notification.attempt, 1);
    assert!(notification.error_message.is_some());
    let next_retry_at = notification.next_retry_at.expect("retry must be scheduled");
    let delay = next_retry_at - Utc::now();
    assert!(
        delay > chrono::Duration::seconds(50) && delay <= chrono::Duration::seconds(60),
        "first retry should be about a minute out, was {delay}"
    );

    // Not due yet, so the next tick skips it.
    assert_eq!(worker.run_once().await?, 0);

    store.make_due(id);
    worker.run_once().await?;

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::Sent);
    assert_eq!(notification.attempt, 2);

    Ok(())
}

/// Test: Exhausted retries move the notification to the dead letter queue
#[tokio::test]
async fn test_exhausted_retries_dead_letter() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let router = router_with(
        FlakySender {
            channel: Channel::Email,
            fail_first: u32::MAX,
            calls: Arc::new(AtomicU32::new(0)),
        },
        100,
    );
    let worker = Worker::new(store.as_ref(), router, worker_config(3));

    let id = store.insert_pending(Channel::Email, email_payload());

    for _ in 0..3 {
        worker.run_once().await?;
        if store.get(id).status == NotificationStatus::Pending {
            store.make_due(id);
        }
    }

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::DeadLettered);
    assert_eq!(notification.attempt, 3);
    assert!(notification.next_retry_at.is_none());

    let dead_letter = store.dead_letter_for(id).expect("dead letter entry must exist");
    assert_eq!(dead_letter.attempts, 3);
    assert!(!dead_letter.last_error.is_empty());

    Ok(())
}

/// Test: Circuit-open deferral does not consume an attempt
#[tokio::test]
async fn test_circuit_open_defers_without_attempt() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    // Breaker trips after the first failure, so the second pickup is rejected
    // before the provider is invoked.
    let calls = Arc::new(AtomicU32::new(0));
    let router = router_with(
        FlakySender {
            channel: Channel::Email,
            fail_first: u32::MAX,
            calls: Arc::clone(&calls),
        },
        1,
    );
    let worker = Worker::new(store.as_ref(), router, worker_config(5));

    let id = store.insert_pending(Channel::Email, email_payload());

    worker.run_once().await?;
    assert_eq!(store.get(id).attempt, 1);

    store.make_due(id);
    worker.run_once().await?;

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::Pending);
    assert_eq!(
        notification.attempt, 1,
        "a fail-fast rejection must not consume an attempt"
    );
    assert!(notification.next_retry_at.expect("deferred") > Utc::now());
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "provider must not be invoked while the circuit is open"
    );
    assert!(store.dead_letter_for(id).is_none());

    Ok(())
}

/// Test: A channel no sender supports dead-letters immediately
#[tokio::test]
async fn test_unroutable_channel_dead_letters() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let router = router_with(
        FlakySender {
            channel: Channel::Email,
            fail_first: 0,
            calls: Arc::new(AtomicU32::new(0)),
        },
        5,
    );
    let worker = Worker::new(store.as_ref(), router, worker_config(5));

    let id = store.insert_pending(Channel::Sms, json!({"phone_number": "+15550100", "message": "m"}));

    worker.run_once().await?;

    let notification = store.get(id);
    assert_eq!(notification.status, NotificationStatus::DeadLettered);
    assert!(store.dead_letter_for(id).is_some());

    Ok(())
}

/// Test: Backoff schedule is deterministic, monotonic, and bounded
#[test]
fn test_backoff_schedule() {
    assert_eq!(backoff_delay(1), chrono::Duration::minutes(1));
    assert_eq!(backoff_delay(2), chrono::Duration::minutes(5));
    assert_eq!(backoff_delay(3), chrono::Duration::minutes(15));
    assert_eq!(backoff_delay(50), chrono::Duration::minutes(15));

    let mut previous = chrono::Duration::zero();
    for attempt in 1..10 {
        let delay = backoff_delay(attempt);
        assert!(delay >= previous, "schedule must be non-decreasing");
        assert!(delay <= chrono::Duration::minutes(15), "schedule is bounded");
        previous = delay;
    }
}
