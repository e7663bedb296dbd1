pub mod email;
pub mod protected;
pub mod router;
pub mod sms;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::notification::{Channel, Notification};

pub use email::{EmailSender, EmailSenderConfig};
pub use protected::ProtectedSender;
pub use router::ChannelRouter;
pub use sms::SmsSender;
pub use webhook::WebhookSender;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("no sender supports channel {0}")]
    Unroutable(Channel),
}

impl SendError {
    /// Fatal faults dead-letter immediately; retrying cannot cure them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SendError::InvalidPayload(_) | SendError::Unroutable(_)
        )
    }
}

/// One delivery attempt to one external channel. Implementations validate the
/// payload shape themselves, never schedule retries, and never touch the
/// store; they must be safe to invoke concurrently.
#[async_trait]
pub trait Sender: Send + Sync {
    fn supports(&self, channel: Channel) -> bool;

    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}
