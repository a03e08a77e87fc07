//! Parser run statistics service.

use crate::repo::item_repo::RepoResult;
use crate::repo::run_repo::{ParserRun, RunId, RunKind, RunRepository, SqliteRunRepository};
use crate::Database;
use log::{error, info};

/// Records start/finish of pipeline stage runs.
pub struct RunTracker<R: RunRepository> {
    repo: R,
}

impl<'db> RunTracker<SqliteRunRepository<'db>> {
    pub fn sqlite(db: &'db mut Database) -> RepoResult<Self> {
        SqliteRunRepository::try_new(db).map(Self::new)
    }
}

impl<R: RunRepository> RunTracker<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Opens a run row; `None` when it could not be stored.
    pub fn start_run(&mut self, kind: RunKind, total_items: u64) -> Option<RunId> {
        match self.repo.start_run(kind, total_items) {
            Ok(id) => {
                info!(
                    "event=run_start module=service status=ok run_id={} parser_type={} total={}",
                    id,
                    kind.as_str(),
                    total_items
                );
                Some(id)
            }
            Err(err) => {
                error!(
                    "event=run_start module=service status=error parser_type={} error_code={} error={}",
                    kind.as_str(),
                    err.code(),
                    err
                );
                None
            }
        }
    }

    /// Closes a run with its final counters.
    pub fn complete_run(&mut self, id: RunId, processed: u64, failed: u64) -> bool {
        match self.repo.complete_run(id, processed, failed) {
            Ok(()) => {
                info!(
                    "event=run_complete module=service status=ok run_id={id} processed={processed} failed={failed}"
                );
                true
            }
            Err(err) => {
                error!(
                    "event=run_complete module=service status=error run_id={} error_code={} error={}",
                    id,
                    err.code(),
                    err
                );
                false
            }
        }
    }

    pub fn get_run(&self, id: RunId) -> Option<ParserRun> {
        self.repo.get_run(id).unwrap_or_else(|err| {
            error!(
                "event=run_get module=service status=error run_id={} error_code={} error={}",
                id,
                err.code(),
                err
            );
            None
        })
    }

    pub fn list_runs(&self) -> Vec<ParserRun> {
        self.repo.list_runs().unwrap_or_else(|err| {
            error!(
                "event=run_list module=service status=error error_code={} error={}",
                err.code(),
                err
            );
            Vec::new()
        })
    }
}
