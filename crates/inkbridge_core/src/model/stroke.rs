//! Stroke domain model.
//!
//! # Responsibility
//! - Define the captured pen path and its nullable block association.
//! - Provide vertical-extent helpers used by spatial association.
//!
//! # Invariants
//! - `id` is the capture start time and never changes.
//! - `points` are time-ordered and never rewritten after capture.
//! - `is_deleted` is the source of truth for user erasure.

use crate::model::block::BlockId;
use serde::{Deserialize, Serialize};

/// Stroke identifier: epoch milliseconds of the first captured point.
pub type StrokeId = i64;

/// One timed sample of a pen path in page coordinates (Y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    /// Unix epoch milliseconds.
    pub t: i64,
}

impl StrokePoint {
    pub fn new(x: f64, y: f64, t: i64) -> Self {
        Self { x, y, t }
    }
}

/// One continuous pen-down-to-pen-up path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub points: Vec<StrokePoint>,
    /// Block currently backed by this stroke. `None` means unassociated.
    #[serde(default)]
    pub block_ref: Option<BlockId>,
    /// Soft delete tombstone set by explicit user erasure.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Stroke {
    /// Builds a stroke whose id is derived from the first point timestamp.
    ///
    /// Returns `None` for an empty point list: a stroke without samples has no
    /// capture start time and cannot be identified.
    pub fn from_points(points: Vec<StrokePoint>) -> Option<Self> {
        let id = points.first()?.t;
        Some(Self::with_id(id, points))
    }

    /// Builds an unassociated stroke with a caller-provided id.
    ///
    /// Used by storage and import paths where identity already exists.
    pub fn with_id(id: StrokeId, points: Vec<StrokePoint>) -> Self {
        Self {
            id,
            points,
            block_ref: None,
            is_deleted: false,
        }
    }

    /// Returns whether this stroke is still part of the live page.
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    /// Returns `(min_y, max_y)` over all points, or `None` when empty.
    pub fn vertical_extent(&self) -> Option<(f64, f64)> {
        let mut points = self.points.iter().filter(|point| point.y.is_finite());
        let first = points.next()?;
        Some(points.fold((first.y, first.y), |(lo, hi), point| {
            (lo.min(point.y), hi.max(point.y))
        }))
    }

    /// Returns whether at least one point lies within `[low, high]`.
    pub fn has_point_within(&self, low: f64, high: f64) -> bool {
        self.points
            .iter()
            .any(|point| point.y >= low && point.y <= high)
    }
}
