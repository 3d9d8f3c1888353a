//! Validated score value object.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

/// A score on the institutional 1–5 scale.
///
/// Raw form values never enter scoring; they are converted through
/// [`Score::new`] (or [`Score::for_field`]) at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 5.0;

    /// Validate a raw value.
    pub fn new(value: f64) -> Result<Self> {
        Self::for_field("score", value)
    }

    /// Validate a raw value, naming `field` in the validation error.
    pub fn for_field(field: &str, value: f64) -> Result<Self> {
        if !value.is_finite() || !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(EngineError::invalid(
                field,
                format!("{value} is outside [{}, {}]", Self::MIN, Self::MAX),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Score {
    type Error = EngineError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
