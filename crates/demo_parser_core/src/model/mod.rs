//! Domain model for scraped marketplace items.
//!
//! # Responsibility
//! - Define listing/detail write inputs and the merged persisted record.
//! - Keep validation rules next to the data they protect.
//!
//! # Invariants
//! - Every record is identified by an externally supplied `item_id`.
//! - Listing and detail writes for one `item_id` describe the same record.

pub mod item;
