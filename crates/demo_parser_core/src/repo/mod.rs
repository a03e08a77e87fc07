//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define keyed item persistence and run-statistics contracts.
//! - Isolate SQL from the boundary services.
//!
//! # Invariants
//! - Repository writes validate inputs before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidData`) in
//!   addition to storage errors.

pub mod item_repo;
pub mod run_repo;
