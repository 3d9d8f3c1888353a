//! NAF weights and the classification threshold table.

use serde::{Deserialize, Serialize};

use avaliar_state::Classification;

use crate::domain::{EngineError, FieldIssue, Result};

/// Category weights of the Final Evaluation Note, in integer percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NafWeights {
    pub individual: u8,
    pub team: u8,
    pub transversal: u8,
    pub technical: u8,
}

impl Default for NafWeights {
    fn default() -> Self {
        Self {
            individual: 40,
            team: 20,
            transversal: 20,
            technical: 20,
        }
    }
}

impl NafWeights {
    /// Validated constructor.
    pub fn new(individual: u8, team: u8, transversal: u8, technical: u8) -> Result<Self> {
        let weights = Self {
            individual,
            team,
            transversal,
            technical,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn total(&self) -> u32 {
        [self.individual, self.team, self.transversal, self.technical]
            .iter()
            .map(|w| u32::from(*w))
            .sum()
    }

    /// Weights must sum to exactly 100.
    pub fn validate(&self) -> Result<()> {
        let total = self.total();
        if total != 100 {
            return Err(EngineError::invalid(
                "weights",
                format!("must sum to 100, got {total}"),
            ));
        }
        Ok(())
    }
}

/// Lower bounds (inclusive) of each classification above `Mau`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationThresholds {
    pub muito_bom: f64,
    pub bom: f64,
    pub suficiente: f64,
    pub insuficiente: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            muito_bom: 4.5,
            bom: 3.5,
            suficiente: 2.5,
            insuficiente: 1.5,
        }
    }
}

impl ClassificationThresholds {
    /// Thresholds must lie in [0,5] and be strictly descending.
    pub fn validate(&self) -> Result<()> {
        let ordered = [
            ("muito_bom", self.muito_bom),
            ("bom", self.bom),
            ("suficiente", self.suficiente),
            ("insuficiente", self.insuficiente),
        ];
        let mut issues = Vec::new();
        for (name, value) in ordered {
            if !(0.0..=5.0).contains(&value) {
                issues.push(FieldIssue::new(
                    format!("thresholds.{name}"),
                    format!("{value} is outside [0, 5]"),
                ));
            }
        }
        for pair in ordered.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            if upper.1 <= lower.1 {
                issues.push(FieldIssue::new(
                    format!("thresholds.{}", upper.0),
                    format!("must be greater than thresholds.{}", lower.0),
                ));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ValidationFailed { fields: issues })
        }
    }

    pub fn classify(&self, note: f64) -> Classification {
        if note >= self.muito_bom {
            Classification::MuitoBom
        } else if note >= self.bom {
            Classification::Bom
        } else if note >= self.suficiente {
            Classification::Suficiente
        } else if note >= self.insuficiente {
            Classification::Insuficiente
        } else {
            Classification::Mau
        }
    }
}

/// Weights and thresholds applied by the score aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default)]
    pub weights: NafWeights,
    #[serde(default)]
    pub thresholds: ClassificationThresholds,
}

impl ScoringPolicy {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_100() {
        NafWeights::default().validate().unwrap();
        assert_eq!(NafWeights::default().total(), 100);
    }

    #[test]
    fn test_weights_off_by_one_rejected() {
        assert!(NafWeights::new(40, 20, 20, 19).is_err());
        assert!(NafWeights::new(40, 20, 20, 21).is_err());
        assert!(NafWeights::new(25, 25, 25, 25).is_ok());
    }

    #[test]
    fn test_classification_boundaries_are_inclusive() {
        let t = ClassificationThresholds::default();
        assert_eq!(t.classify(5.0), Classification::MuitoBom);
        assert_eq!(t.classify(4.5), Classification::MuitoBom);
        assert_eq!(t.classify(4.49), Classification::Bom);
        assert_eq!(t.classify(3.5), Classification::Bom);
        assert_eq!(t.classify(3.49), Classification::Suficiente);
        assert_eq!(t.classify(2.5), Classification::Suficiente);
        assert_eq!(t.classify(2.49), Classification::Insuficiente);
        assert_eq!(t.classify(1.5), Classification::Insuficiente);
        assert_eq!(t.classify(1.49), Classification::Mau);
        assert_eq!(t.classify(0.0), Classification::Mau);
    }

    #[test]
    fn test_non_descending_thresholds_rejected() {
        let t = ClassificationThresholds {
            muito_bom: 4.5,
            bom: 4.0,
            suficiente: 4.0,
            insuficiente: 2.0,
        };
        assert!(t.validate().is_err());

        let alt = ClassificationThresholds {
            muito_bom: 4.5,
            bom: 4.0,
            suficiente: 3.0,
            insuficiente: 2.0,
        };
        alt.validate().unwrap();
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: ScoringPolicy = toml::from_str(
            r#"
            [weights]
            individual = 30
            team = 30
            transversal = 20
            technical = 20
            "#,
        )
        .unwrap();
        policy.validate().unwrap();
        assert_eq!(policy.weights.individual, 30);
        assert_eq!(policy.thresholds, ClassificationThresholds::default());
    }
}
