use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

use super::{DispatchError, DispatchGateway, NotificationMessage};
use crate::config::SmtpSettings;

/// Email transport over SMTP.
pub struct SmtpGateway {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpGateway {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid SMTP sender address '{}'", settings.from))?;

        // relay() is implicit TLS, not plaintext
        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        }
        .with_context(|| format!("Failed to configure SMTP transport for {}", settings.host))?
        .port(settings.port)
        .timeout(Some(Duration::from_secs(settings.timeout_secs)));

        let builder = if let (Some(username), Some(password)) =
            (&settings.username, &settings.password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl DispatchGateway for SmtpGateway {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(
        &self,
        address: &str,
        message: &NotificationMessage,
    ) -> Result<(), DispatchError> {
        let to = address
            .parse::<Mailbox>()
            .map_err(|e| DispatchError::InvalidAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.as_str())
            .header(header::ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| DispatchError::Build(e.to_string()))?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !response.is_positive() {
            return Err(DispatchError::Rejected(response.code().to_string()));
        }
        debug!("Email sent to {}", address);
        Ok(())
    }
}
