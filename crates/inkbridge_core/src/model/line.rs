//! Recognized line model and text canonicalization.
//!
//! # Responsibility
//! - Define the ephemeral per-pass output of the recognition oracle.
//! - Define vertical bounds and their persisted bounds-hint string form.
//! - Normalize recognized text into canonical form for equality checks.
//!
//! # Invariants
//! - `RecognitionLine` values are never persisted directly.
//! - Canonical text is trimmed with whitespace runs collapsed to one space.
//! - Valid bounds are finite with `min_y <= max_y`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const BOUNDS_HINT_SEPARATOR: char = ':';

/// Vertical extent of a recognized line or block, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineBounds {
    pub min_y: f64,
    pub max_y: f64,
}

/// Error returned when a bounds-hint string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundsHintError(pub String);

impl Display for BoundsHintError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid bounds hint `{}`", self.0)
    }
}

impl Error for BoundsHintError {}

impl LineBounds {
    pub fn new(min_y: f64, max_y: f64) -> Self {
        Self { min_y, max_y }
    }

    /// Returns whether both edges are finite and ordered.
    pub fn is_valid(&self) -> bool {
        self.min_y.is_finite() && self.max_y.is_finite() && self.min_y <= self.max_y
    }

    /// Returns whether the two closed intervals share at least one point.
    pub fn overlaps(&self, other: &LineBounds) -> bool {
        self.is_valid()
            && other.is_valid()
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Smallest bounds covering both inputs.
    pub fn union(&self, other: &LineBounds) -> LineBounds {
        LineBounds::new(self.min_y.min(other.min_y), self.max_y.max(other.max_y))
    }

    /// Serializes to the persisted bounds-hint property format.
    pub fn to_hint(&self) -> String {
        format!("{}{BOUNDS_HINT_SEPARATOR}{}", self.min_y, self.max_y)
    }

    /// Parses the persisted bounds-hint property format.
    pub fn parse_hint(value: &str) -> Result<Self, BoundsHintError> {
        let invalid = || BoundsHintError(value.to_string());
        let (min, max) = value.trim().split_once(BOUNDS_HINT_SEPARATOR).ok_or_else(invalid)?;
        let bounds = LineBounds::new(
            min.trim().parse().map_err(|_| invalid())?,
            max.trim().parse().map_err(|_| invalid())?,
        );
        if !bounds.is_valid() {
            return Err(invalid());
        }
        Ok(bounds)
    }
}

/// Union of all valid bounds in the iterator, or `None` if there are none.
pub fn union_bounds<'a>(bounds: impl IntoIterator<Item = &'a LineBounds>) -> Option<LineBounds> {
    bounds
        .into_iter()
        .filter(|value| value.is_valid())
        .fold(None, |acc: Option<LineBounds>, value| {
            Some(acc.map_or(*value, |current| current.union(value)))
        })
}

/// One line of machine-transcribed text for the current stroke batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionLine {
    pub text: String,
    /// Normalized text used for "nothing changed" comparison.
    pub canonical: String,
    /// Approximate vertical bounds. `None` when the oracle reported none.
    #[serde(default)]
    pub bounds: Option<LineBounds>,
    /// Horizontal position of the line start.
    #[serde(default)]
    pub indent_anchor: f64,
    #[serde(default)]
    pub indent_level: u32,
}

impl RecognitionLine {
    /// Creates a root-level line whose canonical text is derived from `text`.
    pub fn new(text: impl Into<String>, bounds: Option<LineBounds>) -> Self {
        let text = text.into();
        let canonical = canonical_text(&text);
        Self {
            text,
            canonical,
            bounds,
            indent_anchor: 0.0,
            indent_level: 0,
        }
    }

    /// Sets the indentation reported by the oracle.
    pub fn with_indent(mut self, indent_anchor: f64, indent_level: u32) -> Self {
        self.indent_anchor = indent_anchor;
        self.indent_level = indent_level;
        self
    }

    /// Bounds only when usable for geometry tests.
    pub fn valid_bounds(&self) -> Option<&LineBounds> {
        self.bounds.as_ref().filter(|bounds| bounds.is_valid())
    }
}

/// Normalizes recognized text: trims and collapses whitespace runs.
pub fn canonical_text(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Joins parts with one space, skipping empty ones.
pub(crate) fn join_nonempty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
