//! Scraped item domain model.
//!
//! # Responsibility
//! - Define the write-side inputs produced by listing/detail extractors.
//! - Define the persisted `ItemRecord` shape returned by store queries.
//! - Normalize prices into a fixed two-decimal representation.
//!
//! # Invariants
//! - `item_id` is the only identity key; it is never empty.
//! - Payloads are opaque JSON objects; their inner shape is caller-defined.
//! - `Price` never carries more than two fractional digits.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maximum accepted `item_id` length in characters.
pub const MAX_ITEM_ID_CHARS: usize = 100;
/// Maximum accepted `title` length in characters.
pub const MAX_TITLE_CHARS: usize = 500;
/// Maximum accepted `url` length in characters.
pub const MAX_URL_CHARS: usize = 1000;
/// Maximum accepted `brand`/`category` length in characters.
pub const MAX_LABEL_CHARS: usize = 100;

// DECIMAL(15, 2): thirteen integer digits plus two fractional digits.
const MAX_PRICE_CENTS: i64 = 999_999_999_999_999;

// Comma-grouped, space-grouped or plain integer part, optional 1-2 digit fraction.
static DISPLAY_PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([0-9]{1,3}(?:,[0-9]{3})+|[0-9]{1,3}(?:[\x{A0} ][0-9]{3})+|[0-9]+)(?:\.([0-9]{1,2}))?",
    )
    .expect("valid price regex")
});

/// Processing state of one item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Row exists but no write has marked it processed yet.
    New,
    /// Last listing/detail/html write succeeded.
    Processed,
    /// Explicitly marked failed by a caller.
    Failed,
}

impl ItemStatus {
    /// Stable storage/wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Parses a stable storage name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-point price with two fractional digits, stored as integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price {
    cents: i64,
}

impl Price {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Builds a price from whole currency units. Returns `None` on overflow.
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Self::from_cents)
    }

    /// Builds a price from a floating value, rounding to the nearest cent.
    ///
    /// Returns `None` for non-finite values or values outside `i64` cents.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents > i64::MAX as f64 || cents < i64::MIN as f64 {
            return None;
        }
        Some(Self::from_cents(cents as i64))
    }

    /// Parses a display string such as `$23,456`, `23 456 ₽` or `1999.5`.
    ///
    /// The first numeric group wins; currency symbols and thousands
    /// separators are ignored. A `-` before the number yields a negative
    /// price. Returns `None` when no number is present or when the number
    /// continues past what can be read unambiguously (`1,2345`, `23.456`).
    pub fn parse_display(text: &str) -> Option<Self> {
        let captures = DISPLAY_PRICE_RE.captures(text)?;
        let whole = captures.get(0)?;
        if continues_number(&text[whole.end()..]) {
            return None;
        }

        let digits: String = captures
            .get(1)?
            .as_str()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let units: i64 = digits.parse().ok()?;
        let fraction = match captures.get(2).map(|m| m.as_str()) {
            Some(value) if value.len() == 1 => value.parse::<i64>().ok()? * 10,
            Some(value) => value.parse::<i64>().ok()?,
            None => 0,
        };
        let cents = units.checked_mul(100)?.checked_add(fraction)?;

        let sign_prefix = text[..whole.start()]
            .trim_end_matches(|c: char| c.is_whitespace() || (!c.is_alphanumeric() && c != '-'));
        if sign_prefix.ends_with('-') {
            cents.checked_neg().map(Self::from_cents)
        } else {
            Some(Self::from_cents(cents))
        }
    }

    pub fn cents(self) -> i64 {
        self.cents
    }

    /// Lossy conversion used for the `DECIMAL(15, 2)` storage column.
    pub fn as_f64(self) -> f64 {
        self.cents as f64 / 100.0
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Validation failures for listing/detail inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    EmptyItemId,
    FieldTooLong { field: &'static str, max_chars: usize },
    NegativePrice(Price),
    PriceOutOfRange(Price),
    PayloadNotObject,
    MissingPayloadId,
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyItemId => write!(f, "item_id cannot be empty"),
            Self::FieldTooLong { field, max_chars } => {
                write!(f, "{field} exceeds {max_chars} characters")
            }
            Self::NegativePrice(price) => write!(f, "price cannot be negative: {price}"),
            Self::PriceOutOfRange(price) => write!(f, "price is out of range: {price}"),
            Self::PayloadNotObject => write!(f, "payload must be a JSON object"),
            Self::MissingPayloadId => write!(f, "payload has no usable `id` field"),
        }
    }
}

impl Error for RecordValidationError {}

/// Listing-stage write input.
///
/// `None` fields mean "not supplied": an update leaves the stored value as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub item_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    /// Raw listing card capture, stored verbatim.
    pub listing_html: Option<String>,
    pub price: Option<Price>,
    /// Raw listing fields as received.
    pub payload: Value,
}

impl ListingRecord {
    /// Creates a listing input with only identity and payload set.
    pub fn new(item_id: impl Into<String>, payload: Value) -> Self {
        Self {
            item_id: item_id.into(),
            title: None,
            url: None,
            brand: None,
            category: None,
            listing_html: None,
            price: None,
            payload,
        }
    }

    /// Builds a listing input from a raw extractor object.
    ///
    /// Recognized keys: `id`, `title`, `url`, `brand`, `category`,
    /// `html_content`, `price_numeric`, `price`. The whole object is kept as
    /// the payload.
    pub fn from_payload(payload: Value) -> Result<Self, RecordValidationError> {
        let object = payload
            .as_object()
            .ok_or(RecordValidationError::PayloadNotObject)?;
        let item_id = payload_id(object).ok_or(RecordValidationError::MissingPayloadId)?;

        let record = Self {
            item_id,
            title: payload_text(object, "title"),
            url: payload_text(object, "url"),
            brand: payload_text(object, "brand"),
            category: payload_text(object, "category"),
            listing_html: payload_text(object, "html_content"),
            price: payload_price(object),
            payload,
        };
        record.validate()?;
        Ok(record)
    }

    /// Validates write-side invariants before persistence.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        validate_item_id(&self.item_id)?;
        check_len("title", self.title.as_deref(), MAX_TITLE_CHARS)?;
        check_len("url", self.url.as_deref(), MAX_URL_CHARS)?;
        check_len("brand", self.brand.as_deref(), MAX_LABEL_CHARS)?;
        check_len("category", self.category.as_deref(), MAX_LABEL_CHARS)?;
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        validate_payload(&self.payload)
    }
}

/// Detail-stage write input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub item_id: String,
    /// Only used when the detail write creates the row.
    pub title: Option<String>,
    /// Only used when the detail write creates the row.
    pub url: Option<String>,
    /// Raw detail page capture, stored verbatim.
    pub detail_html: Option<String>,
    /// Raw detail fields as received.
    pub payload: Value,
}

impl DetailRecord {
    pub fn new(item_id: impl Into<String>, payload: Value) -> Self {
        Self {
            item_id: item_id.into(),
            title: None,
            url: None,
            detail_html: None,
            payload,
        }
    }

    /// Builds a detail input from a raw extractor object.
    ///
    /// The page capture is read from `html_content`, falling back to
    /// `page_html`.
    pub fn from_payload(payload: Value) -> Result<Self, RecordValidationError> {
        let object = payload
            .as_object()
            .ok_or(RecordValidationError::PayloadNotObject)?;
        let item_id = payload_id(object).ok_or(RecordValidationError::MissingPayloadId)?;

        let record = Self {
            item_id,
            title: payload_text(object, "title"),
            url: payload_text(object, "url"),
            detail_html: payload_text(object, "html_content")
                .or_else(|| payload_text(object, "page_html")),
            payload,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), RecordValidationError> {
        validate_item_id(&self.item_id)?;
        check_len("title", self.title.as_deref(), MAX_TITLE_CHARS)?;
        check_len("url", self.url.as_deref(), MAX_URL_CHARS)?;
        validate_payload(&self.payload)
    }
}

/// One persisted item row, merged from every write for its `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    /// Insertion-ordered surrogate key.
    pub row_id: i64,
    pub item_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub status: ItemStatus,
    pub listing_payload: Option<Value>,
    pub detail_payload: Option<Value>,
    pub listing_html: Option<String>,
    pub detail_html: Option<String>,
    pub html_content: Option<String>,
    pub price: Option<Price>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    pub processed_at: Option<i64>,
    pub error_message: Option<String>,
}

impl ItemRecord {
    pub fn has_listing(&self) -> bool {
        self.listing_payload.is_some()
    }

    pub fn has_detail(&self) -> bool {
        self.detail_payload.is_some()
    }

    pub fn has_html_content(&self) -> bool {
        self.html_content.is_some()
    }
}

// True when `rest` keeps going with digits right after a matched number,
// directly or behind a single separator.
fn continues_number(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some(',' | '.' | ' ' | '\u{A0}') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Validates the key and optional url of an html capture write.
pub fn validate_html_target(item_id: &str, url: Option<&str>) -> Result<(), RecordValidationError> {
    validate_item_id(item_id)?;
    check_len("url", url, MAX_URL_CHARS)
}

fn validate_item_id(item_id: &str) -> Result<(), RecordValidationError> {
    if item_id.trim().is_empty() {
        return Err(RecordValidationError::EmptyItemId);
    }
    check_len("item_id", Some(item_id), MAX_ITEM_ID_CHARS)
}

fn check_len(
    field: &'static str,
    value: Option<&str>,
    max_chars: usize,
) -> Result<(), RecordValidationError> {
    match value {
        Some(text) if text.chars().count() > max_chars => {
            Err(RecordValidationError::FieldTooLong { field, max_chars })
        }
        _ => Ok(()),
    }
}

fn validate_price(price: Price) -> Result<(), RecordValidationError> {
    if price.cents() < 0 {
        return Err(RecordValidationError::NegativePrice(price));
    }
    if price.cents() > MAX_PRICE_CENTS {
        return Err(RecordValidationError::PriceOutOfRange(price));
    }
    Ok(())
}

fn validate_payload(payload: &Value) -> Result<(), RecordValidationError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(RecordValidationError::PayloadNotObject)
    }
}

fn payload_id(object: &Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(value) if !value.trim().is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn payload_text(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn payload_price(object: &Map<String, Value>) -> Option<Price> {
    if let Some(numeric) = object.get("price_numeric") {
        let parsed = match numeric {
            Value::Number(value) => value.as_f64().and_then(Price::from_f64),
            Value::String(value) => Price::parse_display(value),
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    object
        .get("price")
        .and_then(Value::as_str)
        .and_then(Price::parse_display)
}
