use async_trait::async_trait;
use tracing::info;

use super::{DispatchError, DispatchGateway, NotificationMessage};

/// No-op transport: logs the notification and reports success.
pub struct LogOnlyGateway;

#[async_trait]
impl DispatchGateway for LogOnlyGateway {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        address: &str,
        message: &NotificationMessage,
    ) -> Result<(), DispatchError> {
        info!(
            recipient = address,
            subject = %message.subject,
            "Dispatch running in log-only mode; skipping actual send"
        );
        Ok(())
    }
}
