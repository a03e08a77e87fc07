//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide keyed upsert APIs over canonical `items` storage.
//! - Answer the work-queue, filter and aggregate queries used by pipeline stages.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths validate inputs before SQL mutations.
//! - Every upsert is find-by-key then insert-or-update inside one immediate
//!   transaction.
//! - Updates only overwrite supplied fields; `status`/`updated_at` always refresh.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::{table_exists, table_has_column, Database, DbError};
use crate::model::item::{
    validate_html_target, DetailRecord, ItemRecord, ItemStatus, ListingRecord, Price,
    RecordValidationError,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

const ITEM_SELECT_SQL: &str = "SELECT
    id,
    item_id,
    title,
    url,
    brand,
    category,
    status,
    listing_payload,
    detail_payload,
    listing_html,
    detail_html,
    html_content,
    price,
    created_at,
    updated_at,
    processed_at,
    error_message
FROM items";

const REQUIRED_ITEM_COLUMNS: &[&str] = &[
    "id",
    "item_id",
    "title",
    "url",
    "brand",
    "category",
    "status",
    "listing_payload",
    "detail_payload",
    "listing_html",
    "detail_html",
    "html_content",
    "price",
    "created_at",
    "updated_at",
    "processed_at",
    "error_message",
];

// NULL unless the detail payload carries an integer `year`.
const DETAIL_YEAR_SQL: &str = "(CASE json_type(detail_payload, '$.year')
        WHEN 'integer' THEN json_extract(detail_payload, '$.year')
    END)";

const TOP_BRANDS_LIMIT: i64 = 10;
const SQLITE_BACKEND: &str = "sqlite";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for item/run persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(RecordValidationError),
    Db(DbError),
    NotFound(String),
    RunNotFound(i64),
    InvalidData(String),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Db(err) => err.code(),
            Self::NotFound(_) => "item_not_found",
            Self::RunNotFound(_) => "run_not_found",
            Self::InvalidData(_) => "invalid_data",
            Self::MissingRequiredTable(_) => "missing_table",
            Self::MissingRequiredColumn { .. } => "missing_column",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(item_id) => write!(f, "item not found: {item_id}"),
            Self::RunNotFound(id) => write!(f, "parser run not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RecordValidationError> for RepoError {
    fn from(value: RecordValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Whether an upsert inserted a new row or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// Filter options for listing items. Results are in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemListQuery {
    /// Case-insensitive exact brand match.
    pub brand: Option<String>,
    pub status: Option<ItemStatus>,
    /// Inclusive lower price bound; rows without a price never match.
    pub min_price: Option<Price>,
    /// Inclusive upper price bound; rows without a price never match.
    pub max_price: Option<Price>,
    /// Inclusive lower bound on the detail payload's `year`; rows without
    /// a numeric detail year never match.
    pub min_year: Option<i64>,
    /// Inclusive upper bound on the detail payload's `year`.
    pub max_year: Option<i64>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Per-status row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub new: u64,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandCount {
    pub brand: String,
    pub count: u64,
}

/// Aggregate view over all stored items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemStatistics {
    pub total: u64,
    pub by_status: StatusCounts,
    /// `processed / total * 100`, `0.0` for an empty store.
    pub success_rate: f64,
    /// Top 10 brands by count desc, ties broken by brand asc.
    pub top_brands: Vec<BrandCount>,
}

/// Backend description for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub backend_kind: &'static str,
    pub location: String,
    pub size_bytes: u64,
    pub tables: Vec<String>,
}

impl StoreInfo {
    /// Size in MiB rounded to two decimals.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Repository interface for keyed item persistence.
pub trait ItemRepository {
    /// Inserts or merges listing-stage fields for `listing.item_id`.
    fn upsert_listing(&mut self, listing: &ListingRecord) -> RepoResult<UpsertOutcome>;
    /// Inserts or merges detail-stage fields for `detail.item_id`.
    fn upsert_detail(&mut self, detail: &DetailRecord) -> RepoResult<UpsertOutcome>;
    /// Sets the html capture (and url when supplied), creating the row if absent.
    fn upsert_html(
        &mut self,
        item_id: &str,
        html: &str,
        url: Option<&str>,
    ) -> RepoResult<UpsertOutcome>;
    /// Sets status, optional error message and `processed_at`.
    fn set_status(
        &mut self,
        item_id: &str,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> RepoResult<()>;
    fn get_item(&self, item_id: &str) -> RepoResult<Option<ItemRecord>>;
    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<ItemRecord>>;
    /// Rows with a listing payload and no detail payload yet.
    fn list_pending_details(&self, limit: u32) -> RepoResult<Vec<ItemRecord>>;
    /// Rows without html content yet.
    fn list_pending_html(&self, limit: u32) -> RepoResult<Vec<ItemRecord>>;
    fn statistics(&self) -> RepoResult<ItemStatistics>;
    /// Deletes every item and parser run; returns the pre-delete item count.
    fn clear_all(&mut self) -> RepoResult<u64>;
    fn store_info(&self) -> RepoResult<StoreInfo>;
}

/// SQLite-backed item repository.
pub struct SqliteItemRepository<'db> {
    db: &'db mut Database,
}

impl<'db> SqliteItemRepository<'db> {
    /// Constructs a repository from a migrated/ready database handle.
    pub fn try_new(db: &'db mut Database) -> RepoResult<Self> {
        ensure_item_connection_ready(db.conn())?;
        Ok(Self { db })
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn upsert_listing(&mut self, listing: &ListingRecord) -> RepoResult<UpsertOutcome> {
        listing.validate()?;
        let payload = encode_payload(&listing.payload)?;
        let price = listing.price.map(Price::as_f64);

        let tx = begin_immediate(self.db.conn_mut())?;
        let outcome = if item_exists_in_tx(&tx, &listing.item_id)? {
            tx.execute(
                "UPDATE items
                 SET
                    title = COALESCE(?2, title),
                    url = COALESCE(?3, url),
                    brand = COALESCE(?4, brand),
                    category = COALESCE(?5, category),
                    listing_html = COALESCE(?6, listing_html),
                    listing_payload = ?7,
                    price = COALESCE(?8, price),
                    status = 'processed',
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE item_id = ?1;",
                params![
                    listing.item_id.as_str(),
                    listing.title.as_deref(),
                    listing.url.as_deref(),
                    listing.brand.as_deref(),
                    listing.category.as_deref(),
                    listing.listing_html.as_deref(),
                    payload,
                    price,
                ],
            )?;
            UpsertOutcome::Updated
        } else {
            tx.execute(
                "INSERT INTO items (
                    item_id,
                    title,
                    url,
                    brand,
                    category,
                    listing_html,
                    listing_payload,
                    price,
                    status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'processed');",
                params![
                    listing.item_id.as_str(),
                    listing.title.as_deref(),
                    listing.url.as_deref(),
                    listing.brand.as_deref(),
                    listing.category.as_deref(),
                    listing.listing_html.as_deref(),
                    payload,
                    price,
                ],
            )?;
            UpsertOutcome::Created
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn upsert_detail(&mut self, detail: &DetailRecord) -> RepoResult<UpsertOutcome> {
        detail.validate()?;
        let payload = encode_payload(&detail.payload)?;

        let tx = begin_immediate(self.db.conn_mut())?;
        let outcome = if item_exists_in_tx(&tx, &detail.item_id)? {
            tx.execute(
                "UPDATE items
                 SET
                    detail_html = COALESCE(?2, detail_html),
                    detail_payload = ?3,
                    status = 'processed',
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE item_id = ?1;",
                params![detail.item_id.as_str(), detail.detail_html.as_deref(), payload],
            )?;
            UpsertOutcome::Updated
        } else {
            tx.execute(
                "INSERT INTO items (
                    item_id,
                    title,
                    url,
                    detail_html,
                    detail_payload,
                    status
                ) VALUES (?1, ?2, ?3, ?4, ?5, 'processed');",
                params![
                    detail.item_id.as_str(),
                    detail.title.as_deref(),
                    detail.url.as_deref(),
                    detail.detail_html.as_deref(),
                    payload,
                ],
            )?;
            UpsertOutcome::Created
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn upsert_html(
        &mut self,
        item_id: &str,
        html: &str,
        url: Option<&str>,
    ) -> RepoResult<UpsertOutcome> {
        let url = url.filter(|value| !value.is_empty());
        validate_html_target(item_id, url)?;

        let tx = begin_immediate(self.db.conn_mut())?;
        let outcome = if item_exists_in_tx(&tx, item_id)? {
            tx.execute(
                "UPDATE items
                 SET
                    html_content = ?2,
                    url = COALESCE(?3, url),
                    status = 'processed',
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE item_id = ?1;",
                params![item_id, html, url],
            )?;
            UpsertOutcome::Updated
        } else {
            tx.execute(
                "INSERT INTO items (item_id, url, html_content, status)
                 VALUES (?1, ?2, ?3, 'processed');",
                params![item_id, url, html],
            )?;
            UpsertOutcome::Created
        };
        tx.commit()?;

        Ok(outcome)
    }

    fn set_status(
        &mut self,
        item_id: &str,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.db.conn().execute(
            "UPDATE items
             SET
                status = ?2,
                error_message = COALESCE(?3, error_message),
                processed_at = (strftime('%s', 'now') * 1000),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_id = ?1;",
            params![item_id, status.as_str(), error_message],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(item_id.to_string()));
        }

        Ok(())
    }

    fn get_item(&self, item_id: &str) -> RepoResult<Option<ItemRecord>> {
        let mut stmt = self
            .db
            .conn()
            .prepare(&format!("{ITEM_SELECT_SQL} WHERE item_id = ?1;"))?;
        let mut rows = stmt.query([item_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_item_row(row)?));
        }

        Ok(None)
    }

    fn list_items(&self, query: &ItemListQuery) -> RepoResult<Vec<ItemRecord>> {
        let mut sql = format!("{ITEM_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(brand) = query.brand.as_ref() {
            sql.push_str(" AND brand = ? COLLATE NOCASE");
            bind_values.push(Value::Text(brand.clone()));
        }

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }

        if let Some(min_price) = query.min_price {
            sql.push_str(" AND price IS NOT NULL AND price >= ?");
            bind_values.push(Value::Real(min_price.as_f64()));
        }

        if let Some(max_price) = query.max_price {
            sql.push_str(" AND price IS NOT NULL AND price <= ?");
            bind_values.push(Value::Real(max_price.as_f64()));
        }

        if let Some(min_year) = query.min_year {
            sql.push_str(&format!(" AND {DETAIL_YEAR_SQL} >= ?"));
            bind_values.push(Value::Integer(min_year));
        }

        if let Some(max_year) = query.max_year {
            sql.push_str(&format!(" AND {DETAIL_YEAR_SQL} <= ?"));
            bind_values.push(Value::Integer(max_year));
        }

        sql.push_str(" ORDER BY id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        query_items(self.db.conn(), &sql, bind_values)
    }

    fn list_pending_details(&self, limit: u32) -> RepoResult<Vec<ItemRecord>> {
        query_items(
            self.db.conn(),
            &format!(
                "{ITEM_SELECT_SQL}
                 WHERE listing_payload IS NOT NULL
                   AND detail_payload IS NULL
                 ORDER BY id ASC
                 LIMIT ?;"
            ),
            vec![Value::Integer(i64::from(limit))],
        )
    }

    fn list_pending_html(&self, limit: u32) -> RepoResult<Vec<ItemRecord>> {
        query_items(
            self.db.conn(),
            &format!(
                "{ITEM_SELECT_SQL}
                 WHERE html_content IS NULL
                 ORDER BY id ASC
                 LIMIT ?;"
            ),
            vec![Value::Integer(i64::from(limit))],
        )
    }

    fn statistics(&self) -> RepoResult<ItemStatistics> {
        let conn = self.db.conn();
        let (total, new, processed, failed): (i64, i64, i64, i64) = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'new' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
             FROM items;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT brand, COUNT(*) AS count
             FROM items
             WHERE brand IS NOT NULL
             GROUP BY brand
             ORDER BY count DESC, brand ASC
             LIMIT ?1;",
        )?;
        let mut rows = stmt.query([TOP_BRANDS_LIMIT])?;
        let mut top_brands = Vec::new();
        while let Some(row) = rows.next()? {
            top_brands.push(BrandCount {
                brand: row.get("brand")?,
                count: count_from_db(row.get("count")?),
            });
        }

        let total = count_from_db(total);
        let by_status = StatusCounts {
            new: count_from_db(new),
            processed: count_from_db(processed),
            failed: count_from_db(failed),
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            by_status.processed as f64 / total as f64 * 100.0
        };

        Ok(ItemStatistics {
            total,
            by_status,
            success_rate,
            top_brands,
        })
    }

    fn clear_all(&mut self) -> RepoResult<u64> {
        let tx = begin_immediate(self.db.conn_mut())?;
        let total: i64 = tx.query_row("SELECT COUNT(*) FROM items;", [], |row| row.get(0))?;
        tx.execute("DELETE FROM items;", [])?;
        if table_exists(&tx, "parser_runs")? {
            tx.execute("DELETE FROM parser_runs;", [])?;
        }
        tx.commit()?;

        Ok(count_from_db(total))
    }

    fn store_info(&self) -> RepoResult<StoreInfo> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT name
             FROM sqlite_master
             WHERE type = 'table'
               AND name NOT LIKE 'sqlite_%'
             ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut tables = Vec::new();
        while let Some(row) = rows.next()? {
            tables.push(row.get(0)?);
        }

        Ok(StoreInfo {
            backend_kind: SQLITE_BACKEND,
            location: self.db.location().describe(),
            size_bytes: self.db.size_bytes()?,
            tables,
        })
    }
}

fn begin_immediate(conn: &mut Connection) -> RepoResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn item_exists_in_tx(tx: &Transaction<'_>, item_id: &str) -> RepoResult<bool> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM items WHERE item_id = ?1);",
        [item_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn query_items(conn: &Connection, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<ItemRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_item_row(row)?);
    }
    Ok(items)
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<ItemRecord> {
    let item_id: String = row.get("item_id")?;

    let status_text: String = row.get("status")?;
    let status = ItemStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in items.status for `{item_id}`"
        ))
    })?;

    let price = match row.get::<_, Option<f64>>("price")? {
        Some(value) => Some(Price::from_f64(value).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid price `{value}` in items.price"))
        })?),
        None => None,
    };

    Ok(ItemRecord {
        row_id: row.get("id")?,
        listing_payload: decode_payload(row, "listing_payload")?,
        detail_payload: decode_payload(row, "detail_payload")?,
        title: row.get("title")?,
        url: row.get("url")?,
        brand: row.get("brand")?,
        category: row.get("category")?,
        status,
        listing_html: row.get("listing_html")?,
        detail_html: row.get("detail_html")?,
        html_content: row.get("html_content")?,
        price,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        processed_at: row.get("processed_at")?,
        error_message: row.get("error_message")?,
        item_id,
    })
}

fn encode_payload(payload: &JsonValue) -> RepoResult<String> {
    serde_json::to_string(payload)
        .map_err(|err| RepoError::InvalidData(format!("payload is not serializable: {err}")))
}

fn decode_payload(row: &Row<'_>, column: &'static str) -> RepoResult<Option<JsonValue>> {
    match row.get::<_, Option<String>>(column)? {
        Some(text) => serde_json::from_str(&text).map(Some).map_err(|err| {
            RepoError::InvalidData(format!("invalid JSON in items.{column}: {err}"))
        }),
        None => Ok(None),
    }
}

fn count_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn ensure_item_connection_ready(conn: &Connection) -> RepoResult<()> {
    if !table_exists(conn, "items")? {
        return Err(RepoError::MissingRequiredTable("items"));
    }

    for column in REQUIRED_ITEM_COLUMNS {
        if !table_has_column(conn, "items", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "items",
                column,
            });
        }
    }

    Ok(())
}
