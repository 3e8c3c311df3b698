mod models;
mod schema;
mod sqlite_server_store;

pub use models::*;
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

pub trait ServerStore: Send + Sync {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    // Schedule state
    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;

    // Job audit log
    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>>;
    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>>;
    fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize>;

    // Newsletter scan cursor
    /// Returns the default cursor (no timestamp, version 0) if no scan has
    /// ever committed.
    fn load_scan_cursor(&self) -> Result<ScanCursor>;
    /// Compare-and-set: stores `last_scan_at` only if the persisted version is
    /// still `expected_version`. Returns false if another writer got there
    /// first.
    fn advance_scan_cursor(&self, expected_version: i64, last_scan_at: DateTime<Utc>)
        -> Result<bool>;
    /// Forget the cursor so the next scan considers every posting.
    fn reset_scan_cursor(&self) -> Result<()>;

    // Scan lease
    /// Take (or renew) the named lease for `holder`. Fails, returning false,
    /// while another holder's lease is unexpired.
    fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;
    /// Returns false if `holder` did not hold the lease.
    fn release_lease(&self, name: &str, holder: &str) -> Result<bool>;
}
