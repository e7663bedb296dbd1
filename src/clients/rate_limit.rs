use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window admission control over a Redis sorted set per key. Each
/// admission is recorded with its nanosecond timestamp as the score; entries
/// older than the window are pruned on every check.
#[derive(Clone)]
pub struct RateLimiter {
    connection: MultiplexedConnection,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(connection: MultiplexedConnection, limit: u32, window: Duration) -> Self {
        Self {
            connection,
            limit,
            window,
        }
    }

    pub async fn allow(&self, key: &str) -> Result<RateLimitDecision, Error> {
        self.allow_n(key, 1).await
    }

    pub async fn allow_n(&self, key: &str, n: u32) -> Result<RateLimitDecision, Error> {
        let mut conn = self.connection.clone();

        let now = Utc::now();
        let now_ns = now.timestamp_nanos_opt().unwrap_or_default();
        let window_start_ns = now_ns - self.window.as_nanos() as i64;
        let reset_at = now
            + chrono::Duration::from_std(self.window)
                .map_err(|e| anyhow!("rate limit window out of range: {e}"))?;

        let redis_key = format!("ratelimit:{key}");

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(&redis_key, 0i64, window_start_ns)
            .ignore()
            .zcard(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("rate limit check failed: {e}"))?;

        let current = count as u32;
        let remaining = self.limit.saturating_sub(current);

        if current + n > self.limit {
            debug!(key, current, limit = self.limit, "Rate limit exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                limit: self.limit,
                remaining,
                reset_at,
            });
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for i in 0..n {
            let member = format!("{now_ns}-{i}");
            pipe.zadd(&redis_key, member, now_ns + i as i64).ignore();
        }
        pipe.expire(&redis_key, self.window.as_secs() as i64 + 1).ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("rate limit record failed: {e}"))?;

        Ok(RateLimitDecision {
            allowed: true,
            limit: self.limit,
            remaining: remaining.saturating_sub(n),
            reset_at,
        })
    }
}
