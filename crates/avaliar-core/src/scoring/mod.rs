//! Final Evaluation Note (NAF) computation.
//!
//! NAF = Σ category average × weight, over individual objectives, team
//! objectives, transversal competencies and technical competencies, rounded
//! half-up to two decimals and graded through one threshold table.

pub mod aggregator;
pub mod policy;
pub mod rounding;

pub use aggregator::{
    compute_category_average, weighted_note, Category, CategoryAverage, ScoreAggregator,
    ScoreBreakdown,
};
pub use policy::{ClassificationThresholds, NafWeights, ScoringPolicy};
pub use rounding::{completion_pct, round_half_up};
