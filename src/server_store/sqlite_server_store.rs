use super::models::{
    JobAuditEntry, JobAuditEventType, JobRun, JobRunStatus, JobScheduleState, ScanCursor,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCAN_CURSOR_ROW_ID: i64 = 1;

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), SERVER_VERSIONED_SCHEMAS, "server")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Server database connection mutex poisoned"))
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let status = JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed);

        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: finished_at_str.and_then(|s| Self::parse_datetime(&s)),
            status,
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at_str: String = row.get("next_run_at")?;
        let last_run_at_str: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: Self::parse_datetime(&next_run_at_str).unwrap_or_else(Utc::now),
            last_run_at: last_run_at_str.and_then(|s| Self::parse_datetime(&s)),
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type_str: String = row.get("event_type")?;
        let event_type =
            JobAuditEventType::parse(&event_type_str).unwrap_or(JobAuditEventType::Progress);

        let timestamp_str: String = row.get("timestamp")?;
        let timestamp = Self::parse_datetime(&timestamp_str)
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| Utc::now().timestamp());

        let details_str: Option<String> = row.get("details")?;
        let details = details_str.and_then(|s| serde_json::from_str(&s).ok());

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type,
            timestamp,
            duration_ms: row.get("duration_ms")?,
            details,
            error: row.get("error")?,
        })
    }
}

impl ServerStore for SqliteServerStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, now, JobRunStatus::Running.as_str(), triggered_by],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;

        Ok(())
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;

        let jobs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
                 FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;

        Ok(job)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());

        // Runs still marked running at startup were interrupted
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                now,
                "Job was interrupted (process restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;

        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;

        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn()?;
        let next_run_at = Self::format_datetime(&state.next_run_at);
        let last_run_at = state.last_run_at.as_ref().map(Self::format_datetime);

        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![state.job_id, next_run_at, last_run_at],
        )?;

        Ok(())
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let now = Self::format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());

        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let entries = stmt
            .query_map(
                params![limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let entries = stmt
            .query_map(
                params![job_id, limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn()?;
        let cutoff = DateTime::from_timestamp(before_timestamp, 0)
            .map(|dt| Self::format_datetime(&dt))
            .unwrap_or_default();

        let deleted = conn.execute(
            "DELETE FROM job_audit_log WHERE timestamp < ?1",
            params![cutoff],
        )?;

        Ok(deleted)
    }

    fn load_scan_cursor(&self) -> Result<ScanCursor> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT last_scan_at, version FROM scan_cursor WHERE id = ?1",
                params![SCAN_CURSOR_ROW_ID],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(ScanCursor::default()),
            Some((last_scan_at, version)) => {
                let last_scan_at = Self::parse_datetime(&last_scan_at)
                    .ok_or_else(|| anyhow!("Corrupt scan cursor timestamp '{}'", last_scan_at))?;
                Ok(ScanCursor {
                    last_scan_at: Some(last_scan_at),
                    version,
                })
            }
        }
    }

    fn advance_scan_cursor(
        &self,
        expected_version: i64,
        last_scan_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let ts = Self::format_datetime(&last_scan_at);

        let changed = if expected_version == 0 {
            conn.execute(
                "INSERT INTO scan_cursor (id, last_scan_at, version) VALUES (?1, ?2, 1)
                 ON CONFLICT(id) DO NOTHING",
                params![SCAN_CURSOR_ROW_ID, ts],
            )?
        } else {
            conn.execute(
                "UPDATE scan_cursor SET last_scan_at = ?1, version = version + 1
                 WHERE id = ?2 AND version = ?3",
                params![ts, SCAN_CURSOR_ROW_ID, expected_version],
            )?
        };

        Ok(changed > 0)
    }

    fn reset_scan_cursor(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM scan_cursor WHERE id = ?1",
            params![SCAN_CURSOR_ROW_ID],
        )?;
        Ok(())
    }

    fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| anyhow!("Lease TTL {} is out of range", ttl))?
            .timestamp_millis();

        let changed = conn.execute(
            "INSERT INTO scan_lease (name, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
             WHERE scan_lease.holder = excluded.holder OR scan_lease.expires_at <= ?4",
            params![name, holder, expires_at, now.timestamp_millis()],
        )?;

        Ok(changed > 0)
    }

    fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM scan_lease WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(deleted > 0)
    }
}
