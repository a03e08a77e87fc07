//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Own the single storage handle (`Database`) shared by every component.
//! - Open and configure SQLite connections for file or in-memory stores.
//! - Apply, report and roll back schema migrations in deterministic order.
//!
//! # Invariants
//! - Applied migrations are tracked in the `schema_migrations` ledger.
//! - Core code must not read/write item data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, Database, DbLocation};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// Ledger holds a version this binary does not know about.
    UnknownAppliedMigration { version: String },
    /// Ledger is not a prefix of the registered migration order.
    NonContiguousLedger { missing: String },
    /// Registered migration list is not strictly ascending.
    UnorderedRegistry { version: String },
    /// Rollback target has never been applied.
    RollbackTargetNotApplied { version: String },
    MigrationFailed {
        version: &'static str,
        direction: migrations::MigrationDirection,
        source: rusqlite::Error,
    },
}

impl DbError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "db_sqlite_error",
            Self::Io(_) => "db_io_error",
            Self::UnknownAppliedMigration { .. } => "unknown_applied_migration",
            Self::NonContiguousLedger { .. } => "non_contiguous_ledger",
            Self::UnorderedRegistry { .. } => "unordered_registry",
            Self::RollbackTargetNotApplied { .. } => "rollback_target_not_applied",
            Self::MigrationFailed { .. } => "migration_failed",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::UnknownAppliedMigration { version } => {
                write!(f, "ledger contains unknown migration version {version}")
            }
            Self::NonContiguousLedger { missing } => write!(
                f,
                "ledger skips migration {missing}; applied versions must be a prefix"
            ),
            Self::UnorderedRegistry { version } => {
                write!(f, "migration {version} is registered out of order")
            }
            Self::RollbackTargetNotApplied { version } => {
                write!(f, "rollback target {version} has not been applied")
            }
            Self::MigrationFailed {
                version,
                direction,
                source,
            } => write!(f, "migration {version} failed during {direction}: {source}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::MigrationFailed { source, .. } => Some(source),
            Self::UnknownAppliedMigration { .. }
            | Self::NonContiguousLedger { .. }
            | Self::UnorderedRegistry { .. }
            | Self::RollbackTargetNotApplied { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

pub(crate) fn table_exists(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn table_has_column(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
