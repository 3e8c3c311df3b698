//! Store traits for the job-board collaborators.
//!
//! Postings and subscribers are owned by the job-board application. The
//! newsletter pipeline only needs the two listing operations; the remaining
//! methods serve the operator CLI and tests.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::models::{JobPosting, PostingStatus, Subscriber};

pub trait PostingStore: Send + Sync {
    /// Postings created at or after `since`, oldest first. `None` lists every
    /// posting.
    fn list_postings_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<JobPosting>>;

    fn get_posting(&self, id: &str) -> Result<Option<JobPosting>>;

    fn insert_posting(&self, posting: &JobPosting) -> Result<()>;

    /// Returns false if no posting has the given id.
    fn set_posting_status(&self, id: &str, status: PostingStatus) -> Result<bool>;
}

pub trait SubscriberStore: Send + Sync {
    /// Active subscribers. Rows with unreadable criteria are skipped.
    fn list_active_subscribers(&self) -> Result<Vec<Subscriber>>;

    fn get_subscriber(&self, id: &str) -> Result<Option<Subscriber>>;

    fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<()>;

    /// Returns false if no subscriber has the given id.
    fn set_subscriber_active(&self, id: &str, active: bool) -> Result<bool>;
}
