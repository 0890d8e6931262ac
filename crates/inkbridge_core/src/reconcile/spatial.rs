//! Spatial association of recognized lines to strokes.
//!
//! # Responsibility
//! - Estimate which strokes produced a recognized line from vertical bounds.
//! - Share the same band-membership test with block split.
//!
//! # Invariants
//! - Pure and total: missing or invalid bounds, or an empty batch, yields an
//!   empty candidate set. Never fails.

use crate::model::line::{LineBounds, RecognitionLine};
use crate::model::stroke::{Stroke, StrokeId};
use std::collections::BTreeSet;

/// Returns ids of strokes with at least one point inside the padded band.
pub fn candidate_strokes<'a>(
    line: &RecognitionLine,
    batch: impl IntoIterator<Item = &'a Stroke>,
    tolerance: f64,
) -> BTreeSet<StrokeId> {
    match line.valid_bounds() {
        Some(bounds) => strokes_in_band(bounds, batch, tolerance),
        None => BTreeSet::new(),
    }
}

/// Returns ids of strokes with a point inside `bounds` padded by `tolerance`.
pub fn strokes_in_band<'a>(
    bounds: &LineBounds,
    batch: impl IntoIterator<Item = &'a Stroke>,
    tolerance: f64,
) -> BTreeSet<StrokeId> {
    if !bounds.is_valid() {
        return BTreeSet::new();
    }
    let tolerance = if tolerance.is_finite() { tolerance.max(0.0) } else { 0.0 };
    let low = bounds.min_y - tolerance;
    let high = bounds.max_y + tolerance;
    batch
        .into_iter()
        .filter(|stroke| stroke.has_point_within(low, high))
        .map(|stroke| stroke.id)
        .collect()
}

/// Side of a horizontal boundary a stroke belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSide {
    Above,
    Below,
}

/// Classifies a stroke against `boundary_y`.
///
/// A stroke with any point in the band above the boundary (`y <= boundary_y`)
/// goes above; everything else, including strokes without points, goes below.
pub fn split_membership(stroke: &Stroke, boundary_y: f64) -> SplitSide {
    if stroke.has_point_within(f64::NEG_INFINITY, boundary_y) {
        SplitSide::Above
    } else {
        SplitSide::Below
    }
}
