//! Domain model for handwriting capture and annotation blocks.
//!
//! # Responsibility
//! - Define strokes, recognized lines and persisted annotation blocks.
//! - Keep geometry and text normalization helpers next to the data they read.
//!
//! # Invariants
//! - Stroke geometry is immutable; `block_ref` and the tombstone are the only
//!   mutable fields.
//! - A block's stroke set is never stored on the block; it is derived from
//!   stroke `block_ref` values.
//! - User deletion of strokes is a soft-delete tombstone, not hard delete.

pub mod block;
pub mod line;
pub mod stroke;
