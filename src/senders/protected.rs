use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{SendError, Sender};
use crate::{
    clients::circuit_breaker::CircuitBreaker,
    models::notification::{Channel, Notification},
};

/// Decorator that gates a sender behind one circuit breaker. A denied call
/// fails fast with `CircuitOpen` without touching the provider.
pub struct ProtectedSender {
    inner: Box<dyn Sender>,
    breaker: Arc<CircuitBreaker>,
}

impl ProtectedSender {
    pub fn new(inner: Box<dyn Sender>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Sender for ProtectedSender {
    fn supports(&self, channel: Channel) -> bool {
        self.inner.supports(channel)
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        if !self.breaker.allow() {
            warn!(
                breaker = self.breaker.name(),
                notification_id = %notification.id,
                channel = %notification.channel,
                state = self.breaker.state().as_str(),
                "Circuit breaker rejected request, failing fast"
            );
            return Err(SendError::CircuitOpen(self.breaker.name().to_string()));
        }

        match self.inner.send(notification).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                debug!(
                    breaker = self.breaker.name(),
                    error = %e,
                    "Circuit breaker recorded failure"
                );
                Err(e)
            }
        }
    }
}
