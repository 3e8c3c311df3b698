//! Periodic newsletter tick.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
    JobAuditLogger,
};
use crate::config::NewsletterSettings;
use crate::newsletter::{NewsletterScanner, TickError, SCAN_LEASE_NAME};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs one newsletter tick per interval, plus once at startup.
pub struct NewsletterJob {
    scanner: Arc<NewsletterScanner>,
    interval: Duration,
}

impl NewsletterJob {
    pub fn new(scanner: Arc<NewsletterScanner>, settings: &NewsletterSettings) -> Self {
        Self {
            scanner,
            interval: settings.scan_interval,
        }
    }
}

impl BackgroundJob for NewsletterJob {
    fn id(&self) -> &'static str {
        "newsletter"
    }

    fn name(&self) -> &'static str {
        "Newsletter"
    }

    fn description(&self) -> &'static str {
        "Match new job postings against subscriber criteria and notify each match once"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.interval).with_startup_run()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = JobAuditLogger::new(Arc::clone(&ctx.server_store), self.id());

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| JobError::ExecutionFailed(format!("No async runtime: {}", e)))?;

        audit.log_started(None);

        let outcome = runtime.block_on(async {
            tokio::select! {
                result = self.scanner.run_tick() => Some(result),
                _ = ctx.cancellation_token.cancelled() => None,
            }
        });

        match outcome {
            None => {
                if let Err(e) = ctx
                    .server_store
                    .release_lease(SCAN_LEASE_NAME, self.scanner.holder())
                {
                    warn!("Failed to release scan lease after cancellation: {}", e);
                }
                audit.log_failed("cancelled", None);
                Err(JobError::Cancelled)
            }
            Some(Ok(report)) => {
                audit.log_completed(serde_json::to_value(&report).ok());
                Ok(())
            }
            Some(Err(e @ (TickError::AlreadyRunning | TickError::LeaseHeld))) => {
                info!("Newsletter tick skipped: {}", e);
                audit.log_completed(Some(serde_json::json!({ "skipped": e.label() })));
                Ok(())
            }
            Some(Err(e)) => {
                audit.log_failed(&e.to_string(), Some(serde_json::json!({ "reason": e.label() })));
                Err(JobError::ExecutionFailed(e.to_string()))
            }
        }
    }
}
