pub mod circuit_breaker;
pub mod database;
pub mod idempotency;
pub mod queue;
pub mod rate_limit;
pub mod redis;
