//! Storage core for the demo marketplace parser.
//! Keyed upsert store for scraped items plus a versioned, reversible
//! SQLite migration runner.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, PipelineConfig, StorageMode};
pub use db::migrations::{
    latest_version, AppliedMigration, Migration, MigrationDirection, MigrationRunner,
    MigrationStatus, MIGRATIONS,
};
pub use db::{open_db, open_db_in_memory, Database, DbError, DbLocation, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::item::{
    DetailRecord, ItemRecord, ItemStatus, ListingRecord, Price, RecordValidationError,
};
pub use repo::item_repo::{
    BrandCount, ItemListQuery, ItemRepository, ItemStatistics, RepoError, RepoResult,
    SqliteItemRepository, StatusCounts, StoreInfo, UpsertOutcome,
};
pub use repo::run_repo::{ParserRun, RunId, RunKind, RunRepository, SqliteRunRepository};
pub use service::item_store::ItemStore;
pub use service::run_tracker::RunTracker;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
