//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections behind one `Database` handle.
//! - Configure connection pragmas required by core behavior.
//! - Recreate the underlying storage object for full resets.
//!
//! # Invariants
//! - Handles returned by `open_db*` have every registered migration applied.
//! - `Database::connect` never touches the schema.

use super::migrations::MigrationRunner;
use super::{DbError, DbResult};
use log::{error, info, warn};
use rusqlite::Connection;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const MEMORY_LOCATION: &str = ":memory:";
const SIDECAR_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Private in-memory database; dropped together with its handle.
    Memory,
}

impl DbLocation {
    /// Human-readable location (`path` or `:memory:`).
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory => MEMORY_LOCATION.to_string(),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }
}

/// The single storage handle passed to stores and migration runners.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    location: DbLocation,
}

impl Database {
    /// Opens and configures a connection without applying migrations.
    ///
    /// Missing parent directories of a file location are created.
    pub fn connect(location: DbLocation) -> DbResult<Self> {
        let conn = open_connection(&location)?;
        Ok(Self { conn, location })
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns the on-disk size (file) or allocated page size (memory).
    pub fn size_bytes(&self) -> DbResult<u64> {
        match &self.location {
            DbLocation::File(path) => match std::fs::metadata(path) {
                Ok(metadata) => Ok(metadata.len()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
                Err(err) => Err(err.into()),
            },
            DbLocation::Memory => {
                let page_count: i64 =
                    self.conn
                        .pragma_query_value(None, "page_count", |row| row.get(0))?;
                let page_size: i64 =
                    self.conn
                        .pragma_query_value(None, "page_size", |row| row.get(0))?;
                Ok(u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0))
            }
        }
    }

    /// Closes the connection, surfacing any pending SQLite error.
    pub fn close(self) -> DbResult<()> {
        self.conn.close().map_err(|(_, err)| DbError::Sqlite(err))
    }

    /// Destroys the underlying storage object and reconnects to an empty one.
    ///
    /// File stores lose the database file and its sidecars; memory stores
    /// are replaced by a fresh private database.
    pub(crate) fn recreate(&mut self) -> DbResult<()> {
        let previous = std::mem::replace(&mut self.conn, placeholder_connection()?);
        if let Err((previous, err)) = previous.close() {
            self.conn = previous;
            return Err(DbError::Sqlite(err));
        }

        // Until the reopen succeeds the handle stays on the read-only
        // placeholder, so writes fail instead of landing in memory.
        let removal = match &self.location {
            DbLocation::File(path) => remove_store_files(path),
            DbLocation::Memory => Ok(()),
        };
        self.conn = open_connection(&self.location)?;
        removal
    }
}

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Creates missing parent directories.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Database> {
    open_migrated(DbLocation::File(path.as_ref().to_path_buf()))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
///
/// Memory stores support every store operation; they only lack durability.
pub fn open_db_in_memory() -> DbResult<Database> {
    open_migrated(DbLocation::Memory)
}

fn open_migrated(location: DbLocation) -> DbResult<Database> {
    let started_at = Instant::now();
    let mode = location.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let mut db = match Database::connect(location) {
        Ok(db) => db,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
    };

    let migrated = MigrationRunner::new(&mut db).try_migrate(None);
    match migrated {
        Ok(_) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(db)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
                mode,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            Err(err)
        }
    }
}

fn open_connection(location: &DbLocation) -> DbResult<Connection> {
    let conn = match location {
        DbLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        }
        DbLocation::Memory => Connection::open_in_memory()?,
    };
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn placeholder_connection() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA query_only = ON;")?;
    Ok(conn)
}

fn remove_store_files(path: &Path) -> DbResult<()> {
    remove_if_exists(path)?;
    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        if let Err(err) = remove_if_exists(Path::new(&sidecar)) {
            warn!(
                "event=db_reset module=db status=warn error_code=sidecar_remove_failed error={}",
                err
            );
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> DbResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
