use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::ledger::NotificationLedger;
use crate::newsletter::NewsletterScanner;
use crate::server_store::ServerStore;
use std::sync::Arc;
use std::time::Instant;

use super::http_layers::RequestsLoggingLevel;

pub type GuardedServerStore = Arc<dyn ServerStore>;
pub type GuardedLedger = Arc<dyn NotificationLedger>;
pub type GuardedScanner = Arc<NewsletterScanner>;

#[derive(Clone)]
pub struct ServerState {
    pub start_time: Instant,
    pub requests_logging_level: RequestsLoggingLevel,
    pub scheduler_handle: SchedulerHandle,
    pub scanner: GuardedScanner,
    pub server_store: GuardedServerStore,
    pub ledger: GuardedLedger,
}

impl ServerState {
    pub fn new(
        scheduler_handle: SchedulerHandle,
        scanner: GuardedScanner,
        server_store: GuardedServerStore,
        ledger: GuardedLedger,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            requests_logging_level: RequestsLoggingLevel::default(),
            scheduler_handle,
            scanner,
            server_store,
            ledger,
        }
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for GuardedServerStore {
    fn from_ref(input: &ServerState) -> Self {
        input.server_store.clone()
    }
}

impl FromRef<ServerState> for GuardedLedger {
    fn from_ref(input: &ServerState) -> Self {
        input.ledger.clone()
    }
}

impl FromRef<ServerState> for RequestsLoggingLevel {
    fn from_ref(input: &ServerState) -> Self {
        input.requests_logging_level
    }
}
