use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Phase of the tick state machine. Every tick starts and ends in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Committing,
    Aborted,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Committing => "committing",
            ScanState::Aborted => "aborted",
        }
    }
}

/// Why a tick did not commit. The cursor is unchanged in every case.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("ledger unavailable: {0}")]
    Ledger(String),
    #[error("a newsletter tick is already running in this process")]
    AlreadyRunning,
    #[error("scan lease is held by another instance")]
    LeaseHeld,
    #[error("tick exceeded its timeout of {0:?}")]
    Timeout(Duration),
    #[error("scan cursor was advanced concurrently (expected version {0})")]
    CursorConflict(i64),
    #[error("internal error: {0}")]
    Internal(String),
}

impl TickError {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TickError::StoreUnavailable(_) => "store_unavailable",
            TickError::Ledger(_) => "ledger_unavailable",
            TickError::AlreadyRunning => "already_running",
            TickError::LeaseHeld => "lease_held",
            TickError::Timeout(_) => "timeout",
            TickError::CursorConflict(_) => "cursor_conflict",
            TickError::Internal(_) => "internal",
        }
    }
}

/// Summary of a committed tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub state: ScanState,
    pub started_at: DateTime<Utc>,
    pub cursor_before: Option<DateTime<Utc>>,
    pub cursor_after: Option<DateTime<Utc>>,
    pub postings_scanned: usize,
    pub subscribers_scanned: usize,
    /// Pairs re-queued from earlier failed attempts outside the scan window.
    pub retry_pairs: usize,
    pub candidate_pairs: usize,
    pub matched: usize,
    pub already_notified: usize,
    pub sent: usize,
    pub failed: usize,
    pub ledger_errors: usize,
}

impl TickReport {
    pub(crate) fn new(started_at: DateTime<Utc>, cursor_before: Option<DateTime<Utc>>) -> Self {
        Self {
            state: ScanState::Scanning,
            started_at,
            cursor_before,
            cursor_after: None,
            postings_scanned: 0,
            subscribers_scanned: 0,
            retry_pairs: 0,
            candidate_pairs: 0,
            matched: 0,
            already_notified: 0,
            sent: 0,
            failed: 0,
            ledger_errors: 0,
        }
    }
}
