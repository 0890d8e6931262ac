//! Persistence gateway abstractions and implementations.
//!
//! # Responsibility
//! - Define the storage contract used by reconciliation and edits.
//! - Isolate SQLite query details from engine and service orchestration.
//!
//! # Invariants
//! - Write paths validate blocks before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod gateway;
pub mod sqlite_gateway;
