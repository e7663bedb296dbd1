pub mod circuit_breaker;
pub mod notification;
pub mod payload;
pub mod retry;
