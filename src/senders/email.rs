use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::info;

use super::{SendError, Sender};
use crate::models::{
    notification::{Channel, Notification},
    payload::EmailPayload,
};

#[derive(Debug, Clone)]
pub struct EmailSenderConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
    pub use_tls: bool,
}

/// Delivers email payloads over SMTP.
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: EmailSenderConfig) -> Result<Self, Error> {
        if config.from_address.trim().is_empty() {
            return Err(anyhow!("email sender requires a configured from address"));
        }

        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| anyhow!("invalid smtp from address: {e}"))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| anyhow!("smtp relay setup failed: {e}"))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        builder = builder.port(config.smtp_port);

        if let (Some(username), Some(password)) = (config.smtp_username, config.smtp_password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Sender for EmailSender {
    fn supports(&self, channel: Channel) -> bool {
        channel == Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        let payload = EmailPayload::parse(&notification.payload)
            .map_err(|e| SendError::InvalidPayload(e.to_string()))?;

        let to: Mailbox = payload
            .to
            .parse()
            .map_err(|e| SendError::InvalidPayload(format!("invalid recipient address: {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(payload.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body)
            .map_err(|e| SendError::InvalidPayload(format!("could not build email: {e}")))?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| SendError::Provider(format!("smtp send failed: {e}")))?;

        // The relay's queue id is useful in logs but is not persisted.
        info!(
            notification_id = %notification.id,
            to = %payload.to,
            code = ?response.code(),
            "Email accepted by SMTP relay"
        );

        Ok(())
    }
}
