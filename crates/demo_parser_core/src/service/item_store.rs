//! Item store use-case service.
//!
//! # Responsibility
//! - Provide the pipeline-facing save/queue/statistics entry points.
//! - Convert repository errors into boolean, count or empty results.
//!
//! # Invariants
//! - Every failure is logged with the operation name and sanitized `item_id`
//!   before being flattened.
//! - Batch saves never abort on a single failing record.
//! - Payload and html content never reach the log.

use crate::logging::sanitize_message;
use crate::model::item::{DetailRecord, ItemRecord, ItemStatus, ListingRecord};
use crate::repo::item_repo::{
    ItemListQuery, ItemRepository, ItemStatistics, RepoError, RepoResult, SqliteItemRepository,
    StoreInfo, UpsertOutcome,
};
use crate::Database;
use log::{debug, error, info};

const MAX_LOGGED_ID_CHARS: usize = 64;

/// Boundary service over an item repository.
pub struct ItemStore<R: ItemRepository> {
    repo: R,
}

impl<'db> ItemStore<SqliteItemRepository<'db>> {
    /// Creates a store over a migrated SQLite database.
    pub fn sqlite(db: &'db mut Database) -> RepoResult<Self> {
        SqliteItemRepository::try_new(db).map(Self::new)
    }
}

impl<R: ItemRepository> ItemStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Saves listing fields; `false` when validation or storage fails.
    pub fn save_listing(&mut self, listing: &ListingRecord) -> bool {
        let result = self.repo.upsert_listing(listing);
        report_upsert("save_listing", &listing.item_id, result)
    }

    /// Saves each listing independently and returns the success count.
    pub fn save_listings_batch(&mut self, listings: &[ListingRecord]) -> usize {
        let saved = listings
            .iter()
            .filter(|listing| self.save_listing(listing))
            .count();
        info!(
            "event=save_listings_batch module=service status=ok total={} saved={}",
            listings.len(),
            saved
        );
        saved
    }

    /// Saves detail fields, creating a bare row when the id is unknown.
    pub fn save_detail(&mut self, detail: &DetailRecord) -> bool {
        let result = self.repo.upsert_detail(detail);
        report_upsert("save_detail", &detail.item_id, result)
    }

    pub fn save_details_batch(&mut self, details: &[DetailRecord]) -> usize {
        let saved = details
            .iter()
            .filter(|detail| self.save_detail(detail))
            .count();
        info!(
            "event=save_details_batch module=service status=ok total={} saved={}",
            details.len(),
            saved
        );
        saved
    }

    /// Stores an html capture; an empty or absent `url` keeps the stored one.
    pub fn save_html_content(&mut self, item_id: &str, html: &str, url: Option<&str>) -> bool {
        let result = self.repo.upsert_html(item_id, html, url);
        report_upsert("save_html_content", item_id, result)
    }

    /// Sets status and `processed_at`; `error_message` is kept when `None`.
    pub fn update_status(
        &mut self,
        item_id: &str,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> bool {
        match self.repo.set_status(item_id, status, error_message) {
            Ok(()) => {
                debug!(
                    "event=update_status module=service status=ok item_id={} item_status={}",
                    logged_id(item_id),
                    status
                );
                true
            }
            Err(err) => {
                log_failure("update_status", Some(item_id), &err);
                false
            }
        }
    }

    pub fn get_item(&self, item_id: &str) -> Option<ItemRecord> {
        self.repo.get_item(item_id).unwrap_or_else(|err| {
            log_failure("get_item", Some(item_id), &err);
            None
        })
    }

    pub fn list_items(&self, query: &ItemListQuery) -> Vec<ItemRecord> {
        self.repo.list_items(query).unwrap_or_else(|err| {
            log_failure("list_items", None, &err);
            Vec::new()
        })
    }

    /// Rows that have a listing but no detail yet, oldest first.
    pub fn get_items_for_details(&self, limit: u32) -> Vec<ItemRecord> {
        self.repo.list_pending_details(limit).unwrap_or_else(|err| {
            log_failure("get_items_for_details", None, &err);
            Vec::new()
        })
    }

    /// Rows without html content yet, oldest first.
    pub fn get_items_for_html(&self, limit: u32) -> Vec<ItemRecord> {
        self.repo.list_pending_html(limit).unwrap_or_else(|err| {
            log_failure("get_items_for_html", None, &err);
            Vec::new()
        })
    }

    /// Aggregates; an all-zero value when the store cannot be read.
    pub fn get_statistics(&self) -> ItemStatistics {
        self.repo.statistics().unwrap_or_else(|err| {
            log_failure("get_statistics", None, &err);
            ItemStatistics::default()
        })
    }

    /// Deletes all items and run statistics; returns the removed item count.
    pub fn clear_all(&mut self) -> usize {
        match self.repo.clear_all() {
            Ok(removed) => {
                info!("event=clear_all module=service status=ok removed={removed}");
                usize::try_from(removed).unwrap_or(usize::MAX)
            }
            Err(err) => {
                log_failure("clear_all", None, &err);
                0
            }
        }
    }

    pub fn get_store_info(&self) -> Option<StoreInfo> {
        self.repo
            .store_info()
            .map_err(|err| log_failure("get_store_info", None, &err))
            .ok()
    }
}

fn report_upsert(event: &'static str, item_id: &str, result: RepoResult<UpsertOutcome>) -> bool {
    match result {
        Ok(outcome) => {
            debug!(
                "event={} module=service status=ok item_id={} outcome={}",
                event,
                logged_id(item_id),
                outcome.as_str()
            );
            true
        }
        Err(err) => {
            log_failure(event, Some(item_id), &err);
            false
        }
    }
}

fn log_failure(event: &'static str, item_id: Option<&str>, err: &RepoError) {
    match item_id {
        Some(item_id) => error!(
            "event={} module=service status=error item_id={} error_code={} error={}",
            event,
            logged_id(item_id),
            err.code(),
            sanitize_message(&err.to_string(), 256)
        ),
        None => error!(
            "event={} module=service status=error error_code={} error={}",
            event,
            err.code(),
            sanitize_message(&err.to_string(), 256)
        ),
    }
}

fn logged_id(item_id: &str) -> String {
    sanitize_message(item_id, MAX_LOGGED_ID_CHARS)
}
