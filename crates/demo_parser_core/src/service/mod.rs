//! Pipeline-facing services.
//!
//! # Responsibility
//! - Wrap repositories into the boolean/count API used by pipeline stages.
//! - Log every flattened failure.

pub mod item_store;
pub mod run_tracker;
