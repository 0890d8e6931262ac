//! Reconciliation tuning knobs.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default vertical margin around recognizer line bounds, in page units.
///
/// Must stay below typical inter-line spacing so adjacent lines do not bleed.
pub const DEFAULT_LINE_TOLERANCE: f64 = 3.0;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Tolerance is negative, NaN or infinite.
    InvalidLineTolerance(f64),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLineTolerance(value) => write!(
                f,
                "line tolerance must be a finite non-negative number, got {value}"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Engine configuration shared by spatial association and edits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileConfig {
    pub line_tolerance: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            line_tolerance: DEFAULT_LINE_TOLERANCE,
        }
    }
}

impl ReconcileConfig {
    /// Returns a config with the given tolerance after validation.
    pub fn with_line_tolerance(line_tolerance: f64) -> Result<Self, ConfigError> {
        let config = Self { line_tolerance };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.line_tolerance.is_finite() || self.line_tolerance < 0.0 {
            return Err(ConfigError::InvalidLineTolerance(self.line_tolerance));
        }
        Ok(())
    }
}
