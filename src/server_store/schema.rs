//! SQLite schema definitions for the server database.
//!
//! Background job runs, schedules and audit log, plus the newsletter scan
//! cursor and scan lease.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job runs and schedules
// =============================================================================

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        Index::plain("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        Index::plain("idx_job_runs_status", "status"),
    ],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
};

// =============================================================================
// Version 2 - Job audit log
// =============================================================================

const JOB_AUDIT_LOG_TABLE_V2: Table = Table {
    name: "job_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        Index::plain("idx_job_audit_log_job_id", "job_id"),
        Index::plain("idx_job_audit_log_timestamp", "timestamp DESC"),
    ],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE job_audit_log (
            id INTEGER PRIMARY KEY,
            job_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            duration_ms INTEGER,
            details TEXT,
            error TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_job_audit_log_job_id ON job_audit_log(job_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_job_audit_log_timestamp ON job_audit_log(timestamp DESC)",
        [],
    )?;
    Ok(())
}

// =============================================================================
// Version 3 - Newsletter scan cursor and lease
// =============================================================================

/// Single row table (id = 1).
const SCAN_CURSOR_TABLE_V3: Table = Table {
    name: "scan_cursor",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("last_scan_at", &SqlType::Text, non_null = true),
        sqlite_column!("version", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const SCAN_LEASE_TABLE_V3: Table = Table {
    name: "scan_lease",
    columns: &[
        sqlite_column!("name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("holder", &SqlType::Text, non_null = true),
        // Unix milliseconds
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE scan_cursor (
            id INTEGER PRIMARY KEY,
            last_scan_at TEXT NOT NULL,
            version INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE scan_lease (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

// =============================================================================
// Versioned Schema Definition
// =============================================================================

/// Version 1: job runs and schedules.
/// Version 2: job audit log.
/// Version 3: scan cursor and scan lease.
pub const SERVER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            JOB_AUDIT_LOG_TABLE_V2,
            SCAN_CURSOR_TABLE_V3,
            SCAN_LEASE_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
