//! Handwriting recognition collaborator.
//!
//! # Responsibility
//! - Define the blocking recognition call used by transcription passes.
//! - Provide a fixture oracle that replays prepared lines.
//!
//! # Invariants
//! - The oracle is never called with an empty batch.
//! - Oracle output is ephemeral and only lives for one pass.

use crate::model::line::RecognitionLine;
use crate::model::stroke::Stroke;
use crate::reconcile::spatial::strokes_in_band;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Recognition failure. Aborts the pass before any block mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// Recognizer could not be reached or refused the batch.
    Unavailable(String),
    /// Recognizer answered with unusable output.
    InvalidOutput(String),
}

impl Display for OracleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "recognizer unavailable: {message}"),
            Self::InvalidOutput(message) => write!(f, "invalid recognizer output: {message}"),
        }
    }
}

impl Error for OracleError {}

/// Turns a stroke batch into recognized lines.
pub trait RecognitionOracle {
    fn recognize(&self, strokes: &[Stroke]) -> Result<Vec<RecognitionLine>, OracleError>;
}

impl<O: RecognitionOracle + ?Sized> RecognitionOracle for &O {
    fn recognize(&self, strokes: &[Stroke]) -> Result<Vec<RecognitionLine>, OracleError> {
        (**self).recognize(strokes)
    }
}

/// Replays a fixed transcript of the page.
///
/// Returns every bounded line with at least one batch stroke inside its band,
/// plus every line without bounds.
#[derive(Debug, Clone, Default)]
pub struct FixtureOracle {
    lines: Vec<RecognitionLine>,
    tolerance: f64,
}

impl FixtureOracle {
    pub fn new(lines: Vec<RecognitionLine>) -> Self {
        Self {
            lines,
            tolerance: 0.0,
        }
    }

    /// Widens each line band by `tolerance` when selecting lines.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Parses one JSON-encoded `RecognitionLine` per non-blank input line.
    pub fn from_json_lines(input: &str) -> Result<Self, OracleError> {
        let mut lines = Vec::new();
        for (index, raw) in input.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let line: RecognitionLine = serde_json::from_str(raw).map_err(|err| {
                OracleError::InvalidOutput(format!("fixture line {}: {err}", index + 1))
            })?;
            lines.push(line);
        }
        Ok(Self::new(lines))
    }

    pub fn lines(&self) -> &[RecognitionLine] {
        &self.lines
    }
}

impl RecognitionOracle for FixtureOracle {
    fn recognize(&self, strokes: &[Stroke]) -> Result<Vec<RecognitionLine>, OracleError> {
        Ok(self
            .lines
            .iter()
            .filter(|line| match line.valid_bounds() {
                Some(bounds) => !strokes_in_band(bounds, strokes, self.tolerance).is_empty(),
                None => true,
            })
            .cloned()
            .collect())
    }
}
