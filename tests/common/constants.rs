//! Shared constants for end-to-end tests
//!
//! When the seeded board changes, update only this file and fixtures.rs.

// ============================================================================
// Seeded postings
// ============================================================================

/// Open "eng" posting, salary 120k, Berlin
pub const JOB_RUST_ID: &str = "job-rust";

/// Open "design" posting, salary 80k, remote
pub const JOB_DESIGN_ID: &str = "job-design";

/// Closed "eng" posting
pub const JOB_CLOSED_ID: &str = "job-closed";

// ============================================================================
// Seeded subscribers
// ============================================================================

/// Wants "eng" postings paying at least 100k
pub const SUB_ENG_ID: &str = "sub-eng";
pub const SUB_ENG_EMAIL: &str = "eng@example.com";

/// No criteria, matches every open posting
pub const SUB_ANY_ID: &str = "sub-any";
pub const SUB_ANY_EMAIL: &str = "any@example.com";

/// Deactivated, never notified
pub const SUB_INACTIVE_ID: &str = "sub-inactive";
pub const SUB_INACTIVE_EMAIL: &str = "inactive@example.com";

/// Matching pairs of the seeded board
pub const SEEDED_MATCHES: usize = 3;

// ============================================================================
// Timeouts
// ============================================================================

pub const REQUEST_TIMEOUT_SECS: u64 = 5;

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// How long to wait for a triggered tick to finish
pub const TICK_WAIT_TIMEOUT_MS: u64 = 10_000;

pub const POLL_INTERVAL_MS: u64 = 20;

/// Interval of the newsletter job in tests, long enough to never fire on its own
pub const TEST_SCAN_INTERVAL_SECS: u64 = 3600;
