//! In-memory state owned by one reconciliation or edit call.
//!
//! # Responsibility
//! - Hold the page's strokes and their block associations between gateway
//!   reads and writes.
//!
//! # Invariants
//! - Stores are page-scoped; callers never mix strokes of different pages.

pub mod stroke_store;
