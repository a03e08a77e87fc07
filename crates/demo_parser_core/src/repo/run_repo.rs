//! Parser run statistics persistence.
//!
//! One row per pipeline stage execution: how many items it was handed, how
//! many it processed or failed, and how long it took.

use super::item_repo::{RepoError, RepoResult};
use crate::db::{table_exists, Database};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const RUN_SELECT_SQL: &str = "SELECT
    id,
    parser_type,
    total_items,
    processed_items,
    failed_items,
    start_time,
    end_time,
    duration_seconds
FROM parser_runs";

/// Row id of a parser run.
pub type RunId = i64;

/// Pipeline stage a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Listing,
    Detail,
    Html,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Detail => "detail",
            Self::Html => "html",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "listing" => Some(Self::Listing),
            "detail" => Some(Self::Detail),
            "html" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Persisted run statistics row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserRun {
    pub id: RunId,
    pub kind: RunKind,
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    /// Unix epoch milliseconds.
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_seconds: Option<f64>,
}

impl ParserRun {
    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Repository interface for parser run statistics.
pub trait RunRepository {
    fn start_run(&mut self, kind: RunKind, total_items: u64) -> RepoResult<RunId>;
    /// Records final counters plus end time and duration.
    fn complete_run(&mut self, id: RunId, processed: u64, failed: u64) -> RepoResult<()>;
    fn get_run(&self, id: RunId) -> RepoResult<Option<ParserRun>>;
    /// All runs, oldest first.
    fn list_runs(&self) -> RepoResult<Vec<ParserRun>>;
}

/// SQLite-backed run repository.
pub struct SqliteRunRepository<'db> {
    db: &'db mut Database,
}

impl<'db> SqliteRunRepository<'db> {
    pub fn try_new(db: &'db mut Database) -> RepoResult<Self> {
        if !table_exists(db.conn(), "parser_runs")? {
            return Err(RepoError::MissingRequiredTable("parser_runs"));
        }
        Ok(Self { db })
    }
}

impl RunRepository for SqliteRunRepository<'_> {
    fn start_run(&mut self, kind: RunKind, total_items: u64) -> RepoResult<RunId> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO parser_runs (parser_type, total_items, start_time)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000));",
            params![kind.as_str(), count_to_db(total_items)?],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&mut self, id: RunId, processed: u64, failed: u64) -> RepoResult<()> {
        let changed = self.db.conn().execute(
            "UPDATE parser_runs
             SET
                processed_items = ?2,
                failed_items = ?3,
                end_time = (strftime('%s', 'now') * 1000),
                duration_seconds = ((strftime('%s', 'now') * 1000) - start_time) / 1000.0,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id, count_to_db(processed)?, count_to_db(failed)?],
        )?;

        if changed == 0 {
            return Err(RepoError::RunNotFound(id));
        }

        Ok(())
    }

    fn get_run(&self, id: RunId) -> RepoResult<Option<ParserRun>> {
        let run = self
            .db
            .conn()
            .query_row(&format!("{RUN_SELECT_SQL} WHERE id = ?1;"), [id], |row| {
                Ok(parse_run_row(row))
            })
            .optional()?;
        run.transpose()
    }

    fn list_runs(&self) -> RepoResult<Vec<ParserRun>> {
        query_runs(self.db.conn(), &format!("{RUN_SELECT_SQL} ORDER BY id ASC;"))
    }
}

fn query_runs(conn: &Connection, sql: &str) -> RepoResult<Vec<ParserRun>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut runs = Vec::new();
    while let Some(row) = rows.next()? {
        runs.push(parse_run_row(row)?);
    }
    Ok(runs)
}

fn parse_run_row(row: &Row<'_>) -> RepoResult<ParserRun> {
    let kind_text: String = row.get("parser_type")?;
    let kind = RunKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid parser_type `{kind_text}` in parser_runs.parser_type"
        ))
    })?;

    Ok(ParserRun {
        id: row.get("id")?,
        kind,
        total_items: count_from_db(row.get("total_items")?)?,
        processed_items: count_from_db(row.get("processed_items")?)?,
        failed_items: count_from_db(row.get("failed_items")?)?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        duration_seconds: row.get("duration_seconds")?,
    })
}

fn count_to_db(value: u64) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("counter {value} exceeds storage range")))
}

fn count_from_db(value: i64) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("negative counter {value} in parser_runs")))
}
