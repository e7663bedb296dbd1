use tracing::debug;

use super::{ProtectedSender, SendError, Sender};
use crate::models::{
    circuit_breaker::CircuitBreakerStats,
    notification::{Channel, Notification},
};

/// Dispatches a notification to the first sender advertising support for its
/// channel tag.
pub struct ChannelRouter {
    senders: Vec<ProtectedSender>,
}

impl ChannelRouter {
    pub fn new(senders: Vec<ProtectedSender>) -> Self {
        Self { senders }
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.senders.iter().any(|s| s.supports(channel))
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        for sender in &self.senders {
            if sender.supports(notification.channel) {
                debug!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    "Routing notification to sender"
                );
                return sender.send(notification).await;
            }
        }

        Err(SendError::Unroutable(notification.channel))
    }

    /// Breaker statistics for all registered senders, for operators.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.senders.iter().map(|s| s.breaker().stats()).collect()
    }
}
