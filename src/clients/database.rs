use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::notification::{
    Channel, DeadLetter, DlqStatus, Notification, NotificationStatus,
};

/// Durable record of notifications and dead-letter entries. All multi-row
/// mutations run in a single transaction.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

pub struct NewNotification {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
    pub payload: JsonValue,
}

pub enum RetryDlqOutcome {
    Retried(Notification),
    NotFound,
    AlreadyProcessed(DlqStatus),
}

pub enum DiscardDlqOutcome {
    Discarded,
    NotFound,
    AlreadyProcessed(DlqStatus),
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection established");

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewNotification) -> Result<Notification, sqlx::Error> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, tenant_id, user_id, channel, payload, status, attempt)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.tenant_id)
        .bind(new.user_id)
        .bind(new.channel.as_str())
        .bind(&new.payload)
        .fetch_one(&self.pool)
        .await?;

        info!(
            notification_id = %notification.id,
            tenant_id = %notification.tenant_id,
            channel = %notification.channel,
            "Notification created"
        );

        Ok(notification)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Conditional write: rows that already reached `sent` or `dead_lettered`
    /// are never touched. Returns whether a row changed.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        attempt: i32,
        error_message: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $1, attempt = $2, error_message = $3, next_retry_at = $4,
                updated_at = NOW()
            WHERE id = $5 AND status NOT IN ('sent', 'dead_lettered')
            "#,
        )
        .bind(status.as_str())
        .bind(attempt)
        .bind(error_message)
        .bind(next_retry_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(
            notification_id = %id,
            status = %status,
            attempt,
            updated = result.rows_affected() > 0,
            "Notification status update"
        );

        Ok(result.rows_affected() > 0)
    }

    /// Claim due pending rows, oldest first, transitioning each to
    /// `processing` so concurrent workers never pick up the same row.
    pub async fn claim_due_pending(&self, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
        let mut claimed = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM notifications
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING does not preserve the subquery ordering.
        claimed.sort_by_key(|n| n.created_at);

        Ok(claimed)
    }

    /// Claim one specific row if it is still pending and due. Used by the
    /// queue-bridge consumer so the polling worker and the consumer never
    /// deliver the same notification twice.
    pub async fn claim_one(&self, id: Uuid) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Atomically park a notification in the dead-letter table and mark the
    /// original row terminal. Returns `None` when the row already reached a
    /// terminal state (a racing worker won).
    pub async fn move_to_dead_letter(
        &self,
        notification: &Notification,
        attempts: i32,
        last_error: &str,
    ) -> Result<Option<DeadLetter>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'dead_lettered', attempt = $2, error_message = $3,
                next_retry_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('sent', 'dead_lettered')
            "#,
        )
        .bind(notification.id)
        .bind(attempts)
        .bind(last_error)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let dead_letter = sqlx::query_as::<_, DeadLetter>(
            r#"
            INSERT INTO dead_letter_notifications (
                id, original_notification_id, tenant_id, user_id, channel,
                payload, attempts, last_error, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.id)
        .bind(notification.tenant_id)
        .bind(notification.user_id)
        .bind(notification.channel.as_str())
        .bind(&notification.payload)
        .bind(attempts)
        .bind(last_error)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            notification_id = %notification.id,
            dlq_id = %dead_letter.id,
            attempts,
            last_error,
            "Notification moved to dead letter queue"
        );

        Ok(Some(dead_letter))
    }

    pub async fn list_dlq_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeadLetter>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT * FROM dead_letter_notifications
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_dlq(&self, id: Uuid) -> Result<Option<DeadLetter>, sqlx::Error> {
        sqlx::query_as::<_, DeadLetter>("SELECT * FROM dead_letter_notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Materialize a fresh pending notification from a dead-letter entry and
    /// mark the entry retried, in one transaction. Entries that are not
    /// `pending` are left untouched.
    pub async fn retry_dlq(&self, id: Uuid) -> Result<RetryDlqOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let dead_letter = sqlx::query_as::<_, DeadLetter>(
            "SELECT * FROM dead_letter_notifications WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(dead_letter) = dead_letter else {
            tx.rollback().await?;
            return Ok(RetryDlqOutcome::NotFound);
        };

        if dead_letter.status != DlqStatus::Pending {
            tx.rollback().await?;
            return Ok(RetryDlqOutcome::AlreadyProcessed(dead_letter.status));
        }

        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, tenant_id, user_id, channel, payload, status, attempt)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(dead_letter.tenant_id)
        .bind(dead_letter.user_id)
        .bind(dead_letter.channel.as_str())
        .bind(&dead_letter.payload)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE dead_letter_notifications
            SET status = 'retried', retried_notification_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(notification.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            dlq_id = %id,
            new_notification_id = %notification.id,
            "Dead letter retried"
        );

        Ok(RetryDlqOutcome::Retried(notification))
    }

    /// Conditional `pending -> discarded` transition.
    pub async fn discard_dlq(&self, id: Uuid) -> Result<DiscardDlqOutcome, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_notifications
            SET status = 'discarded', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(dlq_id = %id, "Dead letter discarded");
            return Ok(DiscardDlqOutcome::Discarded);
        }

        match self.get_dlq(id).await? {
            None => Ok(DiscardDlqOutcome::NotFound),
            Some(dead_letter) => Ok(DiscardDlqOutcome::AlreadyProcessed(dead_letter.status)),
        }
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
