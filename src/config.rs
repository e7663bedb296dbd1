use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::circuit_breaker::CircuitBreakerConfig;

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_env")]
    pub env: String,

    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_db_sslmode")]
    pub db_sslmode: String,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_password: String,
    #[serde(default)]
    pub redis_db: i64,

    // Queue bridge is enabled only when AMQP_URL is set.
    #[serde(default)]
    pub amqp_url: Option<String>,
    #[serde(default = "default_amqp_queue")]
    pub amqp_queue: String,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_from")]
    pub smtp_from: String,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,

    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default)]
    pub sns_region: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout: u64,
    #[serde(default = "default_webhook_timeout_ceiling")]
    pub webhook_timeout_ceiling: u64,

    #[serde(default = "default_worker_poll_interval")]
    pub worker_poll_interval_seconds: u64,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_circuit_open_retry_delay")]
    pub circuit_open_retry_delay_seconds: u64,

    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_idempotency_content_ttl")]
    pub idempotency_content_ttl_seconds: u64,
    #[serde(default = "default_idempotency_reserve_ttl")]
    pub idempotency_reserve_ttl_seconds: u64,

    #[serde(default = "default_circuit_breaker_max_failures")]
    pub circuit_breaker_max_failures: u32,
    #[serde(default = "default_circuit_breaker_recovery_timeout")]
    pub circuit_breaker_recovery_timeout_seconds: u64,
    #[serde(default = "default_circuit_breaker_half_open_max_requests")]
    pub circuit_breaker_half_open_max_requests: u32,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("invalid or missing environment variable: {e}"))?;
        Ok(config)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.db_user,
            self.db_password,
            self.db_host,
            self.db_port,
            self.db_name,
            self.db_sslmode
        )
    }

    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis_password, self.redis_host, self.redis_port, self.redis_db
            )
        }
    }

    pub fn sms_region(&self) -> String {
        self.sns_region.clone().unwrap_or_else(|| self.aws_region.clone())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.circuit_breaker_max_failures,
            recovery_timeout: Duration::from_secs(self.circuit_breaker_recovery_timeout_seconds),
            half_open_max_requests: self.circuit_breaker_half_open_max_requests,
        }
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_interval_seconds)
    }

    pub fn circuit_open_retry_delay(&self) -> Duration {
        Duration::from_secs(self.circuit_open_retry_delay_seconds)
    }
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "notify".to_string()
}

fn default_db_sslmode() -> String {
    "disable".to_string()
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_amqp_queue() -> String {
    "notifications".to_string()
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "noreply@notify.local".to_string()
}

fn default_true() -> bool {
    true
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_webhook_timeout() -> u64 {
    30
}

fn default_webhook_timeout_ceiling() -> u64 {
    120
}

fn default_worker_poll_interval() -> u64 {
    5
}

fn default_worker_batch_size() -> i64 {
    10
}

fn default_max_attempts() -> i32 {
    5
}

fn default_circuit_open_retry_delay() -> u64 {
    30
}

fn default_rate_limit_per_minute() -> u32 {
    100
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_idempotency_content_ttl() -> u64 {
    300
}

fn default_idempotency_reserve_ttl() -> u64 {
    300
}

fn default_circuit_breaker_max_failures() -> u32 {
    5
}

fn default_circuit_breaker_recovery_timeout() -> u64 {
    30
}

fn default_circuit_breaker_half_open_max_requests() -> u32 {
    1
}
