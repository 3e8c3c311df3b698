//! Durable record of which (subscriber, posting) pairs have been notified.

mod models;
mod schema;
mod sqlite_ledger;

pub use models::{DispatchOutcome, NotificationRecord};
pub use schema::LEDGER_VERSIONED_SCHEMAS;
pub use sqlite_ledger::SqliteNotificationLedger;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Append-only ledger of dispatch attempts.
///
/// A pair has been notified iff it has a `sent` record. There is never more
/// than one `sent` record per pair, regardless of how many writers race.
pub trait NotificationLedger: Send + Sync {
    fn has_notified(&self, subscriber_id: &str, job_id: &str) -> Result<bool>;

    /// Record a confirmed dispatch. Returns false, without error, if the pair
    /// already had a successful record.
    fn record_success(
        &self,
        subscriber_id: &str,
        job_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool>;

    /// Append a failed attempt. Does not affect future eligibility of the pair.
    fn record_failure(
        &self,
        subscriber_id: &str,
        job_id: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<()>;

    /// Every record for the pair, oldest first.
    fn records_for_pair(&self, subscriber_id: &str, job_id: &str)
        -> Result<Vec<NotificationRecord>>;

    fn success_count(&self, subscriber_id: &str, job_id: &str) -> Result<usize>;

    /// (subscriber_id, job_id) pairs with at least one failed attempt and no
    /// successful one.
    fn pending_retries(&self) -> Result<Vec<(String, String)>>;

    /// Most recent records across all pairs, newest first.
    fn recent_records(&self, limit: usize) -> Result<Vec<NotificationRecord>>;

    /// Delete failed records older than `before`. Successful records are
    /// kept forever. Returns the number of deleted rows.
    fn purge_failures_before(&self, before: DateTime<Utc>) -> Result<usize>;
}
