//! Domain models for Avaliar.
//!
//! - `EngineError`: error taxonomy shared by every engine operation
//! - `Score`: validated 1–5 score value object
//! - operation payloads (`NewCycle`, `NewEvaluation`, `ObjectiveInput`, ...)

pub mod error;
pub mod inputs;
pub mod score;

pub use error::{EngineError, FieldIssue, Result};
pub use inputs::{CompetencyScoreInput, NewCycle, NewEvaluation, ObjectiveInput};
pub use score::Score;
