//! SQLite schema for the notification ledger.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Notification records
// =============================================================================

const NOTIFICATION_RECORDS_TABLE_V1: Table = Table {
    name: "notification_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("subscriber_id", &SqlType::Text, non_null = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        // 'sent' or 'failed'
        sqlite_column!("outcome", &SqlType::Text, non_null = true),
        sqlite_column!("reason", &SqlType::Text),
        // Unix milliseconds
        sqlite_column!("dispatched_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        // At most one successful record per pair
        Index {
            name: "idx_records_sent_pair",
            columns: "subscriber_id, job_id",
            unique: true,
            predicate: Some("outcome = 'sent'"),
        },
        Index::plain("idx_records_pair", "subscriber_id, job_id"),
        Index::plain("idx_records_dispatched_at", "dispatched_at"),
    ],
};

pub const LEDGER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[NOTIFICATION_RECORDS_TABLE_V1],
    migration: None,
}];
