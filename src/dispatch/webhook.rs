use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{DispatchError, DispatchGateway, NotificationMessage};
use crate::config::WebhookSettings;

/// Posts each notification as JSON to an HTTP endpoint, for deployments that
/// hand delivery off to another service.
pub struct WebhookGateway {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl WebhookGateway {
    pub fn new(settings: &WebhookSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            bearer_token: settings.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl DispatchGateway for WebhookGateway {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(
        &self,
        address: &str,
        message: &NotificationMessage,
    ) -> Result<(), DispatchError> {
        let payload = WebhookPayload {
            to: address,
            subject: &message.subject,
            body: &message.body,
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected(format!(
                "status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
