use super::models::{DispatchOutcome, NotificationRecord};
use super::schema::LEDGER_VERSIONED_SCHEMAS;
use super::NotificationLedger;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const RECORD_COLUMNS: &str = "id, subscriber_id, job_id, outcome, reason, dispatched_at";

#[derive(Clone)]
pub struct SqliteNotificationLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNotificationLedger {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), LEDGER_VERSIONED_SCHEMAS, "ledger")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Ledger database connection mutex poisoned"))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
        let outcome_str: String = row.get("outcome")?;
        let dispatched_at_ms: i64 = row.get("dispatched_at")?;
        Ok(NotificationRecord {
            id: row.get("id")?,
            subscriber_id: row.get("subscriber_id")?,
            job_id: row.get("job_id")?,
            outcome: DispatchOutcome::parse(&outcome_str).unwrap_or(DispatchOutcome::Failed),
            reason: row.get("reason")?,
            dispatched_at: DateTime::from_timestamp_millis(dispatched_at_ms).unwrap_or_default(),
        })
    }
}

impl NotificationLedger for SqliteNotificationLedger {
    fn has_notified(&self, subscriber_id: &str, job_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notification_records
                           WHERE subscriber_id = ?1 AND job_id = ?2 AND outcome = 'sent')",
            params![subscriber_id, job_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn record_success(
        &self,
        subscriber_id: &str,
        job_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT INTO notification_records (subscriber_id, job_id, outcome, reason, dispatched_at)
                 VALUES (?1, ?2, 'sent', NULL, ?3)
                 ON CONFLICT DO NOTHING",
                params![subscriber_id, job_id, timestamp.timestamp_millis()],
            )
            .with_context(|| {
                format!("Failed to record success for ({}, {})", subscriber_id, job_id)
            })?;
        if inserted == 0 {
            debug!(
                "Pair ({}, {}) already notified, success not recorded again",
                subscriber_id, job_id
            );
        }
        Ok(inserted > 0)
    }

    fn record_failure(
        &self,
        subscriber_id: &str,
        job_id: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notification_records (subscriber_id, job_id, outcome, reason, dispatched_at)
             VALUES (?1, ?2, 'failed', ?3, ?4)",
            params![subscriber_id, job_id, reason, timestamp.timestamp_millis()],
        )
        .with_context(|| format!("Failed to record failure for ({}, {})", subscriber_id, job_id))?;
        Ok(())
    }

    fn records_for_pair(
        &self,
        subscriber_id: &str,
        job_id: &str,
    ) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notification_records
             WHERE subscriber_id = ?1 AND job_id = ?2
             ORDER BY dispatched_at ASC, id ASC",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![subscriber_id, job_id], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn success_count(&self, subscriber_id: &str, job_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notification_records
             WHERE subscriber_id = ?1 AND job_id = ?2 AND outcome = 'sent'",
            params![subscriber_id, job_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn pending_retries(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT f.subscriber_id, f.job_id FROM notification_records f
             WHERE f.outcome = 'failed'
               AND NOT EXISTS (
                   SELECT 1 FROM notification_records s
                   WHERE s.subscriber_id = f.subscriber_id
                     AND s.job_id = f.job_id
                     AND s.outcome = 'sent'
               )
             ORDER BY f.subscriber_id, f.job_id",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    fn recent_records(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notification_records ORDER BY dispatched_at DESC, id DESC LIMIT ?1",
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn purge_failures_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM notification_records WHERE outcome = 'failed' AND dispatched_at < ?1",
            params![before.timestamp_millis()],
        )?;
        Ok(deleted)
    }
}
