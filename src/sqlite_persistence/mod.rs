//! Declarative, versioned SQLite schemas shared by every store in the crate.

mod versioned_schema;

pub use versioned_schema::{
    open_versioned_db, Column, Index, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
};
