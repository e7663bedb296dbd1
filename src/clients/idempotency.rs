use anyhow::{Error, Result, anyhow};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{models::retry::RetryConfig, utils::retry_with_backoff};

const RESERVED_MARKER: &str = "processing";

/// Serialized acceptance outcome kept in the cache so replays of the same
/// `(tenant, key)` re-emit the original response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOutcome {
    pub notification_id: Uuid,
    pub status_code: u16,
    pub created_at: i64,
}

#[derive(Debug)]
pub enum IdempotencyCheck {
    Miss,
    Hit(StoredOutcome),
    InFlight,
}

#[derive(Clone)]
pub struct IdempotencyCache {
    connection: MultiplexedConnection,
    reserve_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl IdempotencyCache {
    pub fn new(connection: MultiplexedConnection, reserve_ttl_seconds: u64) -> Self {
        Self {
            connection,
            reserve_ttl_seconds,
            retry_config: RetryConfig::default(),
        }
    }

    fn build_key(tenant_id: &str, key: &str) -> String {
        format!("idempotency:{tenant_id}:{key}")
    }

    /// Derived key for submissions without a caller-supplied header: identical
    /// envelopes hash to the same key, so network retries are absorbed without
    /// blocking intentional re-sends (these keys get the short TTL).
    pub fn content_key(
        tenant_id: &Uuid,
        user_id: &Uuid,
        channel: &str,
        payload: &JsonValue,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_bytes());
        hasher.update(user_id.as_bytes());
        hasher.update(channel.as_bytes());
        hasher.update(payload.to_string().as_bytes());
        format!("content-{:x}", hasher.finalize())
    }

    pub async fn check(&self, tenant_id: &str, key: &str) -> Result<IdempotencyCheck, Error> {
        let full_key = Self::build_key(tenant_id, key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(&full_key)
            .await
            .map_err(|e| anyhow!("Failed to get cached value: {e}"))?;

        let check = match value.as_deref() {
            None => IdempotencyCheck::Miss,
            Some(RESERVED_MARKER) => IdempotencyCheck::InFlight,
            Some(raw) => match serde_json::from_str::<StoredOutcome>(raw) {
                Ok(outcome) => IdempotencyCheck::Hit(outcome),
                Err(e) => {
                    warn!(
                        key = %full_key,
                        error = %e,
                        "Unreadable idempotency value, treating as miss"
                    );
                    IdempotencyCheck::Miss
                }
            },
        };

        debug!(tenant_id, key, check = ?check, "Checked idempotency");

        Ok(check)
    }

    /// Atomically reserve the key if nothing is stored under it. The
    /// reservation carries its own bounded TTL so a crashed acceptance path
    /// cannot block the key forever.
    pub async fn reserve(&self, tenant_id: &str, key: &str) -> Result<bool, Error> {
        let full_key = Self::build_key(tenant_id, key);
        let mut conn = self.connection.clone();

        let set: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(RESERVED_MARKER)
            .arg("NX")
            .arg("EX")
            .arg(self.reserve_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to reserve idempotency key: {e}"))?;

        Ok(set.is_some())
    }

    /// Overwrite the reservation with the final outcome.
    pub async fn store(
        &self,
        tenant_id: &str,
        key: &str,
        outcome: &StoredOutcome,
        ttl_seconds: u64,
    ) -> Result<(), Error> {
        let full_key = Self::build_key(tenant_id, key);
        let data = serde_json::to_string(outcome)?;

        retry_with_backoff(&self.retry_config, || {
            let full_key = full_key.clone();
            let data = data.clone();
            let mut conn = self.connection.clone();

            async move {
                conn.set_ex::<_, _, ()>(&full_key, data, ttl_seconds)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to store idempotency outcome: {e}"))?;

        debug!(tenant_id, key, "Stored idempotency outcome");

        Ok(())
    }

    /// Return a cached outcome if present, otherwise try to reserve the key.
    /// A lost reservation race reports `InFlight`.
    pub async fn check_or_reserve(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<IdempotencyCheck, Error> {
        match self.check(tenant_id, key).await? {
            IdempotencyCheck::Miss => {
                if self.reserve(tenant_id, key).await? {
                    Ok(IdempotencyCheck::Miss)
                } else {
                    Ok(IdempotencyCheck::InFlight)
                }
            }
            other => Ok(other),
        }
    }
}
