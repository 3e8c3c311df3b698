use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};
use std::path::Path;
use tracing::info;

/// Offset added to the schema version stored in `PRAGMA user_version`, so a
/// database created by some other tool is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "REAL" => Some(&SqlType::Real),
            "BLOB" => Some(&SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

/// A secondary index. `predicate` turns it into a partial index.
pub struct Index {
    pub name: &'static str,
    pub columns: &'static str,
    pub unique: bool,
    pub predicate: Option<&'static str>,
}

impl Index {
    pub const fn plain(name: &'static str, columns: &'static str) -> Self {
        Self {
            name,
            columns,
            unique: false,
            predicate: None,
        }
    }

    fn create_sql(&self, table: &str) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {}({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns
        );
        if let Some(predicate) = self.predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        sql
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [Index],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns_sql = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    sql.push_str(&format!(" DEFAULT {}", default_value));
                }
                sql
            })
            .collect::<Vec<_>>()
            .join(", ");

        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, columns_sql),
            params![],
        )?;

        for index in self.indices {
            conn.execute(&index.create_sql(self.name), params![])?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let declared: String = row.get(2)?;
                let sql_type = SqlType::parse(&declared).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(2, declared.clone(), Type::Text)
                })?;
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {} ({})",
                self.name,
                actual_columns.len(),
                self.columns.len(),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
            // SQLite may report defaults wrapped in parentheses
            let actual_default = actual.default_value.as_deref().map(strip_parentheses);
            let expected_default = expected.default_value.map(strip_parentheses);
            if actual_default != expected_default {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }

        for index in self.indices {
            let unique: Option<i32> = conn
                .query_row(
                    "SELECT il.\"unique\" FROM pragma_index_list(?1) il WHERE il.name = ?2",
                    params![self.name, index.name],
                    |r| r.get(0),
                )
                .ok();
            match unique {
                None => bail!("Table {} is missing index '{}'", self.name, index.name),
                Some(u) if (u == 1) != index.unique => bail!(
                    "Table {} index '{}' uniqueness mismatch: expected {}",
                    self.name,
                    index.name,
                    index.unique
                ),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn strip_parentheses(s: &str) -> &str {
    s.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(s)
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Open (or create) a SQLite database governed by `schemas`.
///
/// A new file gets the latest schema. An existing file is validated against
/// the schema of its recorded version and migrated forward in a single
/// transaction.
pub fn open_versioned_db(
    path: &Path,
    schemas: &'static [VersionedSchema],
    label: &str,
) -> Result<Connection> {
    let latest = schemas
        .last()
        .with_context(|| format!("No schema declared for the {} database", label))?;
    let is_new_db = !path.exists();

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open {} database at {:?}", label, path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    // The ledger and cursor tables are written from the tick while the CLI may
    // read them, so wait on locks rather than failing immediately.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    if is_new_db {
        info!("Creating new {} database at {:?}", label, path);
        latest.create(&conn)?;
        return Ok(conn);
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!(
            "{} database version {} is invalid (expected >= 1)",
            label,
            db_version
        );
    }
    let db_version = db_version as usize;

    let current = schemas
        .iter()
        .find(|s| s.version == db_version)
        .with_context(|| format!("Unknown {} database version {}", label, db_version))?;
    current.validate(&conn).with_context(|| {
        format!(
            "{} database schema validation failed for version {}",
            label, db_version
        )
    })?;

    if db_version < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, db_version, latest.version
        );
        let tx = conn.transaction()?;
        for schema in schemas.iter().filter(|s| s.version > db_version) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run {} migration to version {}", label, schema.version)
                })?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
        tx.commit()?;
    }

    Ok(conn)
}
