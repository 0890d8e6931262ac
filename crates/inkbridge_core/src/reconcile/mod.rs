//! Stroke-to-block reconciliation.
//!
//! # Responsibility
//! - Decide per-block actions from one recognition pass (`engine`).
//! - Apply decided actions through the persistence gateway (`commit`).
//! - Restructure blocks on explicit user edits (`edit`).
//!
//! # Invariants
//! - Planning is pure; only `commit` and `edit` write.
//! - In-memory stroke state changes only after the matching write succeeds.

pub mod commit;
pub mod config;
pub mod edit;
pub mod engine;
pub mod spatial;
pub mod transform;
