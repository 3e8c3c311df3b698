use crate::ledger::NotificationLedger;
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to server-side state (job history, schedules, scan cursor).
    pub server_store: Arc<dyn ServerStore>,

    /// Access to the notification ledger.
    pub ledger: Arc<dyn NotificationLedger>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        server_store: Arc<dyn ServerStore>,
        ledger: Arc<dyn NotificationLedger>,
    ) -> Self {
        Self {
            cancellation_token,
            server_store,
            ledger,
        }
    }

    /// Same resources, different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            server_store: Arc::clone(&self.server_store),
            ledger: Arc::clone(&self.ledger),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
