//! SQLite-backed posting and subscriber store.

use super::models::{JobPosting, PostingStatus, Subscriber, SubscriptionCriteria};
use super::schema::BOARD_VERSIONED_SCHEMAS;
use super::trait_def::{PostingStore, SubscriberStore};
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

const POSTING_COLUMNS: &str =
    "id, title, description, category, location, job_type, company_name, salary, status, created_at";

#[derive(Clone)]
pub struct SqliteBoardStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBoardStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), BOARD_VERSIONED_SCHEMAS, "board")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Board database connection mutex poisoned"))
    }

    fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        let status_str: String = row.get("status")?;
        let salary: Option<i64> = row.get("salary")?;
        let created_at_ms: i64 = row.get("created_at")?;

        Ok(JobPosting {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            category: row.get("category")?,
            location: row.get("location")?,
            job_type: row.get("job_type")?,
            company_name: row.get("company_name")?,
            // Negative salaries are garbage; treat as absent
            salary: salary.and_then(|s| u64::try_from(s).ok()),
            // Unknown statuses are never notified
            status: PostingStatus::parse(&status_str).unwrap_or(PostingStatus::Closed),
            created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap_or_default(),
        })
    }

    /// Reads a subscriber row. `Ok(None)` means the stored criteria could not
    /// be decoded.
    fn row_to_subscriber(row: &rusqlite::Row) -> rusqlite::Result<Option<Subscriber>> {
        let id: String = row.get("id")?;
        let criteria_json: String = row.get("criteria")?;
        let criteria = match serde_json::from_str::<SubscriptionCriteria>(&criteria_json) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring subscriber {} with malformed criteria: {}", id, e);
                return Ok(None);
            }
        };
        let active: i64 = row.get("active")?;

        Ok(Some(Subscriber {
            id,
            name: row.get("name")?,
            email: row.get("email")?,
            criteria,
            active: active != 0,
        }))
    }
}

impl PostingStore for SqliteBoardStore {
    fn list_postings_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<JobPosting>> {
        let conn = self.conn()?;
        let since_ms = since.map(|dt| dt.timestamp_millis()).unwrap_or(i64::MIN);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM postings WHERE created_at >= ?1 ORDER BY created_at ASC, id ASC",
            POSTING_COLUMNS
        ))?;
        let postings = stmt
            .query_map(params![since_ms], Self::row_to_posting)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list postings")?;
        Ok(postings)
    }

    fn get_posting(&self, id: &str) -> Result<Option<JobPosting>> {
        let conn = self.conn()?;
        let posting = conn
            .query_row(
                &format!("SELECT {} FROM postings WHERE id = ?1", POSTING_COLUMNS),
                params![id],
                Self::row_to_posting,
            )
            .optional()?;
        Ok(posting)
    }

    fn insert_posting(&self, posting: &JobPosting) -> Result<()> {
        let conn = self.conn()?;
        let salary = posting
            .salary
            .map(i64::try_from)
            .transpose()
            .context("Salary does not fit in a SQLite integer")?;
        conn.execute(
            "INSERT INTO postings (id, title, description, category, location, job_type,
                                   company_name, salary, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                posting.id,
                posting.title,
                posting.description,
                posting.category,
                posting.location,
                posting.job_type,
                posting.company_name,
                salary,
                posting.status.as_str(),
                posting.created_at.timestamp_millis(),
            ],
        )
        .with_context(|| format!("Failed to insert posting {}", posting.id))?;
        Ok(())
    }

    fn set_posting_status(&self, id: &str, status: PostingStatus) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE postings SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(updated > 0)
    }
}

impl SubscriberStore for SqliteBoardStore {
    fn list_active_subscribers(&self) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, email, criteria, active FROM subscribers
             WHERE active = 1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_subscriber)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list subscribers")?;
        Ok(rows.into_iter().flatten().collect())
    }

    fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>> {
        let conn = self.conn()?;
        let subscriber = conn
            .query_row(
                "SELECT id, name, email, criteria, active FROM subscribers WHERE id = ?1",
                params![id],
                Self::row_to_subscriber,
            )
            .optional()?;
        Ok(subscriber.flatten())
    }

    fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let conn = self.conn()?;
        let criteria = serde_json::to_string(&subscriber.criteria)?;
        conn.execute(
            "INSERT INTO subscribers (id, name, email, criteria, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                subscriber.id,
                subscriber.name,
                subscriber.email,
                criteria,
                subscriber.active as i64,
            ],
        )
        .with_context(|| format!("Failed to insert subscriber {}", subscriber.id))?;
        Ok(())
    }

    fn set_subscriber_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE subscribers SET active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        Ok(updated > 0)
    }
}
