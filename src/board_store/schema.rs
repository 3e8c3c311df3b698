//! SQLite schema for the board database (postings and subscribers).
//!
//! These tables are owned by the job-board application; the notifier only
//! reads them, except for the operator CLI and tests.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Postings and subscribers
// =============================================================================

const POSTINGS_TABLE_V1: Table = Table {
    name: "postings",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("job_type", &SqlType::Text),
        sqlite_column!("company_name", &SqlType::Text),
        sqlite_column!("salary", &SqlType::Integer),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'open'")
        ),
        // Unix milliseconds
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[Index::plain("idx_postings_created_at", "created_at")],
};

const SUBSCRIBERS_TABLE_V1: Table = Table {
    name: "subscribers",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("email", &SqlType::Text, non_null = true),
        // JSON encoded SubscriptionCriteria
        sqlite_column!(
            "criteria",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'{}'")
        ),
        sqlite_column!(
            "active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[Index::plain("idx_subscribers_active", "active")],
};

pub const BOARD_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[POSTINGS_TABLE_V1, SUBSCRIBERS_TABLE_V1],
    migration: None,
}];
