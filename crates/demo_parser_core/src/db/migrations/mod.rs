//! SQLite migration registry and runner.
//!
//! # Responsibility
//! - Register reversible schema migrations in strictly increasing order.
//! - Apply/roll back migrations one transaction at a time.
//! - Track applied state in the `schema_migrations` ledger.
//!
//! # Invariants
//! - `version` values are zero-padded numeric strings and remain monotonic.
//! - Applied versions always form a prefix of `MIGRATIONS`.
//! - A migration and its ledger row commit (or roll back) together.
//! - Every `up` is idempotent, so re-running on an up-to-date store is a no-op.

use crate::db::{table_has_column, Database, DbError, DbResult};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Ledger table name.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// One direction of a schema change, executed inside a transaction.
pub type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

/// Compile-time migration descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub up: MigrationFn,
    pub down: MigrationFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

impl Display for MigrationDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        description: "Initial database schema",
        up: initial_schema_up,
        down: initial_schema_down,
    },
    Migration {
        version: "002",
        description: "Add database indexes",
        up: indexes_up,
        down: indexes_down,
    },
    Migration {
        version: "003",
        description: "Add metadata fields",
        up: metadata_columns_up,
        down: metadata_columns_down,
    },
    Migration {
        version: "004",
        description: "Add status constraints",
        up: status_checks_up,
        down: status_checks_down,
    },
];

const METADATA_COLUMNS: &[(&str, &str)] = &[
    ("metadata", "TEXT"),
    ("tags", "TEXT"),
    ("priority", "INTEGER NOT NULL DEFAULT 0"),
    ("is_active", "INTEGER NOT NULL DEFAULT 1"),
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> &'static str {
    MIGRATIONS.last().map_or("", |migration| migration.version)
}

/// Snapshot of applied vs pending migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
    pub total_count: usize,
    pub applied_count: usize,
    pub pending_count: usize,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: String,
    pub description: Option<String>,
    /// Unix epoch milliseconds.
    pub applied_at: i64,
}

/// Applies and rolls back registered migrations on one `Database`.
///
/// `try_*` methods return typed errors; the plain methods are the
/// boolean boundary used by callers and log every failure.
pub struct MigrationRunner<'db> {
    db: &'db mut Database,
    migrations: &'static [Migration],
}

impl<'db> MigrationRunner<'db> {
    /// Creates a runner over the built-in migration list.
    pub fn new(db: &'db mut Database) -> Self {
        Self::with_migrations(db, MIGRATIONS)
    }

    /// Creates a runner over a caller-provided ordered migration list.
    pub fn with_migrations(db: &'db mut Database, migrations: &'static [Migration]) -> Self {
        Self { db, migrations }
    }

    pub fn migrations(&self) -> &'static [Migration] {
        self.migrations
    }

    /// Returns the migration status, or an empty snapshot on storage failure.
    pub fn status(&self) -> MigrationStatus {
        match self.try_status() {
            Ok(status) => status,
            Err(err) => {
                error!(
                    "event=migration_status module=migrations status=error error_code={} error={}",
                    err.code(),
                    err
                );
                MigrationStatus::default()
            }
        }
    }

    pub fn try_status(&self) -> DbResult<MigrationStatus> {
        let conn = self.db.conn();
        ensure_ledger(conn)?;
        let applied = applied_versions(conn)?;
        let pending: Vec<String> = self
            .migrations
            .iter()
            .filter(|migration| !applied.iter().any(|version| version == migration.version))
            .map(|migration| migration.version.to_string())
            .collect();

        Ok(MigrationStatus {
            total_count: self.migrations.len(),
            applied_count: applied.len(),
            pending_count: pending.len(),
            applied,
            pending,
        })
    }

    /// Returns ledger rows in version order.
    pub fn try_ledger(&self) -> DbResult<Vec<AppliedMigration>> {
        let conn = self.db.conn();
        ensure_ledger(conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT version, description, applied_at FROM {LEDGER_TABLE} ORDER BY version ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(AppliedMigration {
                version: row.get("version")?,
                description: row.get("description")?,
                applied_at: row.get("applied_at")?,
            });
        }
        Ok(entries)
    }

    /// Applies pending migrations up to `target` (inclusive) or all of them.
    ///
    /// Returns `false` on the first failure; earlier migrations stay applied.
    pub fn migrate(&mut self, target: Option<&str>) -> bool {
        match self.try_migrate(target) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    "event=migrate module=migrations status=error target={} error_code={} error={}",
                    target.unwrap_or("latest"),
                    err.code(),
                    err
                );
                false
            }
        }
    }

    /// Applies pending migrations and returns the versions applied by this call.
    pub fn try_migrate(&mut self, target: Option<&str>) -> DbResult<Vec<&'static str>> {
        ensure_ledger(self.db.conn())?;
        let applied = applied_versions(self.db.conn())?;
        let applied_count = self.check_ledger(&applied)?;

        if let Some(target) = target {
            if applied.iter().any(|version| version == target) {
                info!(
                    "event=migrate module=migrations status=ok target={target} applied=0 reason=already_applied"
                );
                return Ok(Vec::new());
            }
        }

        let pending: Vec<Migration> = self.migrations[applied_count..]
            .iter()
            .take_while(|migration| target.map_or(true, |target| migration.version <= target))
            .copied()
            .collect();

        let mut done = Vec::with_capacity(pending.len());
        for migration in pending {
            self.apply_one(migration)?;
            done.push(migration.version);
        }

        info!(
            "event=migrate module=migrations status=ok target={} applied={}",
            target.unwrap_or("latest"),
            done.len()
        );
        Ok(done)
    }

    /// Rolls back the latest migration, or every migration above `target`.
    ///
    /// Returns `false` when `target` was never applied or a `down` fails;
    /// migrations rolled back before the failure stay rolled back.
    pub fn rollback(&mut self, target: Option<&str>) -> bool {
        match self.try_rollback(target) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    "event=rollback module=migrations status=error target={} error_code={} error={}",
                    target.unwrap_or("previous"),
                    err.code(),
                    err
                );
                false
            }
        }
    }

    /// Rolls back migrations and returns the versions reverted by this call.
    pub fn try_rollback(&mut self, target: Option<&str>) -> DbResult<Vec<&'static str>> {
        ensure_ledger(self.db.conn())?;
        let applied = applied_versions(self.db.conn())?;
        let applied_count = self.check_ledger(&applied)?;

        if let Some(target) = target {
            if !applied.iter().any(|version| version == target) {
                return Err(DbError::RollbackTargetNotApplied {
                    version: target.to_string(),
                });
            }
        }

        let applied_migrations = &self.migrations[..applied_count];
        let to_revert: Vec<Migration> = match target {
            None => applied_migrations.last().copied().into_iter().collect(),
            Some(target) => applied_migrations
                .iter()
                .rev()
                .filter(|migration| migration.version > target)
                .copied()
                .collect(),
        };

        let mut done = Vec::with_capacity(to_revert.len());
        for migration in to_revert {
            self.revert_one(migration)?;
            done.push(migration.version);
        }

        info!(
            "event=rollback module=migrations status=ok target={} reverted={}",
            target.unwrap_or("previous"),
            done.len()
        );
        Ok(done)
    }

    /// Deletes the whole storage object and re-applies every migration.
    pub fn reset(&mut self) -> bool {
        let location = self.db.location().describe();
        warn!("event=db_reset module=migrations status=start location={location}");
        if let Err(err) = self.db.recreate() {
            error!(
                "event=db_reset module=migrations status=error error_code={} error={}",
                err.code(),
                err
            );
            return false;
        }
        self.migrate(None)
    }

    fn check_ledger(&self, applied: &[String]) -> DbResult<usize> {
        for pair in self.migrations.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(DbError::UnorderedRegistry {
                    version: pair[1].version.to_string(),
                });
            }
        }

        for version in applied {
            if !self
                .migrations
                .iter()
                .any(|migration| migration.version == version)
            {
                return Err(DbError::UnknownAppliedMigration {
                    version: version.clone(),
                });
            }
        }

        let applied_count = applied.len();
        for migration in &self.migrations[..applied_count] {
            if !applied.iter().any(|version| version == migration.version) {
                return Err(DbError::NonContiguousLedger {
                    missing: migration.version.to_string(),
                });
            }
        }

        Ok(applied_count)
    }

    fn apply_one(&mut self, migration: Migration) -> DbResult<()> {
        let started_at = Instant::now();
        let tx = self
            .db
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        (migration.up)(&tx).map_err(|source| DbError::MigrationFailed {
            version: migration.version,
            direction: MigrationDirection::Up,
            source,
        })?;
        tx.execute(
            &format!(
                "INSERT INTO {LEDGER_TABLE} (version, description, applied_at)
                 VALUES (?1, ?2, (strftime('%s', 'now') * 1000));"
            ),
            [migration.version, migration.description],
        )?;
        tx.commit()?;

        info!(
            "event=migration_apply module=migrations status=ok version={} duration_ms={}",
            migration.version,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn revert_one(&mut self, migration: Migration) -> DbResult<()> {
        let started_at = Instant::now();
        let tx = self
            .db
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        (migration.down)(&tx).map_err(|source| DbError::MigrationFailed {
            version: migration.version,
            direction: MigrationDirection::Down,
            source,
        })?;
        tx.execute(
            &format!("DELETE FROM {LEDGER_TABLE} WHERE version = ?1;"),
            [migration.version],
        )?;
        tx.commit()?;

        info!(
            "event=migration_revert module=migrations status=ok version={} duration_ms={}",
            migration.version,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn ensure_ledger(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL UNIQUE,
            description TEXT,
            applied_at INTEGER NOT NULL
        );"
    ))
}

fn applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT version FROM {LEDGER_TABLE} ORDER BY version ASC;"
    ))?;
    let mut rows = stmt.query([])?;
    let mut versions = Vec::new();
    while let Some(row) = rows.next()? {
        versions.push(row.get(0)?);
    }
    Ok(versions)
}

fn initial_schema_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0001_initial_schema.sql"))
}

fn initial_schema_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0001_initial_schema.down.sql"))
}

fn indexes_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0002_indexes.sql"))
}

fn indexes_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0002_indexes.down.sql"))
}

// SQLite has no `ADD COLUMN IF NOT EXISTS`; guard each column instead.
fn metadata_columns_up(conn: &Connection) -> rusqlite::Result<()> {
    for (column, declaration) in METADATA_COLUMNS {
        if !table_has_column(conn, "items", column)? {
            conn.execute_batch(&format!(
                "ALTER TABLE items ADD COLUMN {column} {declaration};"
            ))?;
        }
    }
    Ok(())
}

fn metadata_columns_down(conn: &Connection) -> rusqlite::Result<()> {
    for (column, _) in METADATA_COLUMNS.iter().rev() {
        if table_has_column(conn, "items", column)? {
            conn.execute_batch(&format!("ALTER TABLE items DROP COLUMN {column};"))?;
        }
    }
    Ok(())
}

fn status_checks_up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0004_status_checks.sql"))
}

fn status_checks_down(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("0004_status_checks.down.sql"))
}

#[cfg(test)]
mod tests {
    use super::{latest_version, MIGRATIONS};

    #[test]
    fn registry_versions_are_strictly_ascending() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn registry_versions_are_zero_padded_numbers() {
        for migration in MIGRATIONS {
            assert_eq!(migration.version.len(), 3);
            assert!(migration.version.chars().all(|c| c.is_ascii_digit()));
        }
        assert_eq!(latest_version(), "004");
    }
}
