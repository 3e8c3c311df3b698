//! Outbound notification transports.
//!
//! The newsletter pipeline only depends on [`DispatchGateway`]. Gateways own
//! their transport-level timeouts and retries; any error they return is a
//! failed attempt for the pair.

mod log_only;
mod smtp;
mod webhook;

pub use log_only::LogOnlyGateway;
pub use smtp::SmtpGateway;
pub use webhook::WebhookGateway;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::board_store::{JobPosting, Subscriber};
use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DispatchGateway: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn send(&self, address: &str, message: &NotificationMessage)
        -> Result<(), DispatchError>;
}

/// Builds the notification for one matched (posting, subscriber) pair.
pub fn compose_message(posting: &JobPosting, subscriber: &Subscriber) -> NotificationMessage {
    let category = posting.category.as_deref().unwrap_or("your field");
    let subject = format!(
        "Hot Job Alert: {} in {} Available Now",
        posting.title, category
    );

    let mut body = format!(
        "Hello {},\n\nA new job matching your preferences has just been posted:\n\n{}\n",
        subscriber.name, posting.title
    );
    for (label, value) in [
        ("Company", posting.company_name.clone()),
        ("Location", posting.location.clone()),
        ("Job type", posting.job_type.clone()),
        ("Salary", posting.salary.map(|s| s.to_string())),
    ] {
        if let Some(value) = value {
            body.push_str(&format!("{}: {}\n", label, value));
        }
    }
    body.push_str(&format!(
        "\n{}\n\nDon't wait too long, positions like this fill up fast.\n",
        posting.description
    ));

    NotificationMessage { subject, body }
}

/// Picks the transport from configuration: SMTP if configured, then the
/// webhook, otherwise log-only.
pub fn build_gateway(config: &AppConfig) -> Result<Arc<dyn DispatchGateway>> {
    if let Some(smtp) = &config.smtp {
        if config.webhook.is_some() {
            warn!("Both SMTP and webhook are configured, using SMTP");
        }
        return Ok(Arc::new(SmtpGateway::new(smtp)?));
    }
    if let Some(webhook) = &config.webhook {
        return Ok(Arc::new(WebhookGateway::new(webhook)?));
    }
    warn!("No dispatch transport configured; notifications will only be logged");
    Ok(Arc::new(LogOnlyGateway))
}
