//! Retention for failed dispatch records and the job audit log.
//!
//! Successful ledger records are never deleted; they are what keeps a pair
//! from being notified twice.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
    JobAuditLogger,
};
use crate::config::NewsletterSettings;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct FailureLogCleanupJob {
    retention_days: u64,
    interval: Duration,
}

impl FailureLogCleanupJob {
    pub fn from_settings(settings: &NewsletterSettings) -> Self {
        Self {
            retention_days: settings.failure_retention_days,
            interval: settings.cleanup_interval,
        }
    }
}

impl BackgroundJob for FailureLogCleanupJob {
    fn id(&self) -> &'static str {
        "failure_log_cleanup"
    }

    fn name(&self) -> &'static str {
        "Failure Log Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete failed dispatch records and job audit entries past the retention period"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::every(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = JobAuditLogger::new(Arc::clone(&ctx.server_store), self.id());

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = i64::try_from(self.retention_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .ok_or_else(|| {
                JobError::ExecutionFailed(format!(
                    "Retention of {} days is out of range",
                    self.retention_days
                ))
            })?;
        audit.log_started(Some(serde_json::json!({
            "retention_days": self.retention_days,
            "cutoff": cutoff.to_rfc3339(),
        })));

        let failures_deleted = match ctx.ledger.purge_failures_before(cutoff) {
            Ok(deleted) => deleted,
            Err(e) => {
                let error_msg = format!("Failed to purge dispatch failures: {}", e);
                audit.log_failed(&error_msg, None);
                return Err(JobError::ExecutionFailed(error_msg));
            }
        };

        audit.log_progress(serde_json::json!({ "failures_deleted": failures_deleted }));

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let audit_deleted = match ctx
            .server_store
            .cleanup_old_job_audit_entries(cutoff.timestamp())
        {
            Ok(deleted) => deleted,
            Err(e) => {
                let error_msg = format!("Failed to clean up job audit log: {}", e);
                audit.log_failed(
                    &error_msg,
                    Some(serde_json::json!({ "failures_deleted": failures_deleted })),
                );
                return Err(JobError::ExecutionFailed(error_msg));
            }
        };

        if failures_deleted > 0 || audit_deleted > 0 {
            info!(
                "Deleted {} failed dispatch records and {} audit entries older than {} days",
                failures_deleted, audit_deleted, self.retention_days
            );
        }
        audit.log_completed(Some(serde_json::json!({
            "failures_deleted": failures_deleted,
            "audit_entries_deleted": audit_deleted,
        })));

        Ok(())
    }
}
