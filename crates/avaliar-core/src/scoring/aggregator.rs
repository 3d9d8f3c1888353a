//! Category averages, the weighted Final Evaluation Note and its
//! classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use avaliar_state::{
    CategoryAverages, Classification, CompetencyKind, CompetencyScoreRecord, ObjectiveKind,
    ObjectiveRecord,
};

use super::policy::{NafWeights, ScoringPolicy};
use super::rounding::round_cents;
use crate::domain::{EngineError, FieldIssue, Result, Score};

/// The four NAF categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    IndividualObjectives,
    TeamObjectives,
    TransversalCompetencies,
    TechnicalCompetencies,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndividualObjectives => "individual_objectives",
            Self::TeamObjectives => "team_objectives",
            Self::TransversalCompetencies => "transversal_competencies",
            Self::TechnicalCompetencies => "technical_competencies",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic mean of one category and the number of scores behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryAverage {
    pub value: f64,
    pub samples: usize,
}

impl CategoryAverage {
    /// No scores were available; `value` is 0.
    pub fn insufficient(&self) -> bool {
        self.samples == 0
    }
}

/// Mean of `scores`; an empty slice yields 0 flagged insufficient.
pub fn compute_category_average(scores: &[Score]) -> CategoryAverage {
    if scores.is_empty() {
        return CategoryAverage {
            value: 0.0,
            samples: 0,
        };
    }
    let sum: f64 = scores.iter().map(|s| s.value()).sum();
    CategoryAverage {
        value: sum / scores.len() as f64,
        samples: scores.len(),
    }
}

/// `Σ average × weight`, rounded half-up to two decimals.
pub fn weighted_note(
    individual: f64,
    team: f64,
    transversal: f64,
    technical: f64,
    weights: &NafWeights,
) -> f64 {
    // Weights are percentages, so the raw sum is already in hundredths.
    let cents = individual * f64::from(weights.individual)
        + team * f64::from(weights.team)
        + transversal * f64::from(weights.transversal)
        + technical * f64::from(weights.technical);
    round_cents(cents)
}

/// Averages, note and grade frozen into an evaluation at submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub averages: CategoryAverages,
    pub final_note: f64,
    pub classification: Classification,
}

/// Stateless scorer parameterised by a validated [`ScoringPolicy`].
///
/// This is the only place NAF and classification are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreAggregator {
    policy: ScoringPolicy,
}

impl ScoreAggregator {
    pub fn new(policy: ScoringPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn classify(&self, note: f64) -> Classification {
        self.policy.thresholds.classify(note)
    }

    /// Weighted note and classification from the four category averages.
    pub fn compute_final_note(
        &self,
        individual: f64,
        team: f64,
        transversal: f64,
        technical: f64,
    ) -> (f64, Classification) {
        let note = weighted_note(
            individual,
            team,
            transversal,
            technical,
            &self.policy.weights,
        );
        (note, self.classify(note))
    }

    /// Group objective and competency scores into the four categories and
    /// derive the breakdown.
    ///
    /// Fails with `ValidationFailed` when any objective is unscored, any
    /// score lies outside [1,5], or any category has no data.
    pub fn evaluate(
        &self,
        objectives: &[ObjectiveRecord],
        competencies: &[CompetencyScoreRecord],
    ) -> Result<ScoreBreakdown> {
        let mut issues = Vec::new();
        let mut individual = Vec::new();
        let mut team = Vec::new();
        let mut transversal = Vec::new();
        let mut technical = Vec::new();

        for objective in objectives {
            let field = format!("objective:{}.score", objective.id);
            let Some(raw) = objective.score else {
                issues.push(FieldIssue::new(field, "objective has not been scored"));
                continue;
            };
            match Score::for_field(&field, raw) {
                Ok(score) => match objective.kind {
                    ObjectiveKind::Individual => individual.push(score),
                    ObjectiveKind::Team => team.push(score),
                },
                Err(err) => issues.extend(validation_fields(err)),
            }
        }

        for row in competencies {
            let field = format!("competency:{}.score", row.competency_id);
            match Score::for_field(&field, row.score) {
                Ok(score) => match row.kind {
                    CompetencyKind::Transversal => transversal.push(score),
                    CompetencyKind::Technical => technical.push(score),
                },
                Err(err) => issues.extend(validation_fields(err)),
            }
        }

        let averages = [
            (Category::IndividualObjectives, compute_category_average(&individual)),
            (Category::TeamObjectives, compute_category_average(&team)),
            (
                Category::TransversalCompetencies,
                compute_category_average(&transversal),
            ),
            (
                Category::TechnicalCompetencies,
                compute_category_average(&technical),
            ),
        ];
        for (category, average) in &averages {
            if average.insufficient() {
                issues.push(FieldIssue::new(
                    category.as_str(),
                    "insufficient data: no scored entries",
                ));
            }
        }

        if !issues.is_empty() {
            return Err(EngineError::ValidationFailed { fields: issues });
        }

        let averages = CategoryAverages {
            individual: averages[0].1.value,
            team: averages[1].1.value,
            transversal: averages[2].1.value,
            technical: averages[3].1.value,
        };
        let (final_note, classification) = self.compute_final_note(
            averages.individual,
            averages.team,
            averages.transversal,
            averages.technical,
        );
        Ok(ScoreBreakdown {
            averages,
            final_note,
            classification,
        })
    }
}

fn validation_fields(err: EngineError) -> Vec<FieldIssue> {
    match err {
        EngineError::ValidationFailed { fields } => fields,
        other => vec![FieldIssue::new("score", other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaliar_state::{
        CompetencyId, CompetencyScoreId, CycleId, EvaluationId, ObjectiveId, PrincipalId,
    };
    use chrono::Utc;

    fn scores(values: &[f64]) -> Vec<Score> {
        values.iter().map(|v| Score::new(*v).unwrap()).collect()
    }

    fn make_objective(kind: ObjectiveKind, score: Option<f64>) -> ObjectiveRecord {
        ObjectiveRecord {
            id: ObjectiveId::new(),
            cycle_id: CycleId::from("c"),
            subject_id: PrincipalId::from("ana"),
            org_unit_id: None,
            kind,
            description: "objective".to_string(),
            planned_target: 1.0,
            achieved_target: None,
            completion_pct: None,
            score,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    fn make_competency(id: &str, kind: CompetencyKind, score: f64) -> CompetencyScoreRecord {
        CompetencyScoreRecord {
            id: CompetencyScoreId::new(),
            evaluation_id: EvaluationId::from("ev"),
            competency_id: CompetencyId::from(id),
            kind,
            score,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_average() {
        let avg = compute_category_average(&scores(&[4.0, 5.0, 3.0]));
        assert_eq!(avg.value, 4.0);
        assert_eq!(avg.samples, 3);
        assert!(!avg.insufficient());
    }

    #[test]
    fn test_empty_category_is_insufficient() {
        let avg = compute_category_average(&[]);
        assert_eq!(avg.value, 0.0);
        assert!(avg.insufficient());
    }

    #[test]
    fn test_default_weights_reference_case() {
        let agg = ScoreAggregator::default();
        let (note, class) = agg.compute_final_note(4.0, 4.5, 5.0, 4.0);
        assert_eq!(note, 4.30);
        assert_eq!(class, Classification::Bom);
    }

    #[test]
    fn test_custom_weights() {
        let policy = ScoringPolicy {
            weights: NafWeights::new(25, 25, 25, 25).unwrap(),
            ..ScoringPolicy::default()
        };
        let agg = ScoreAggregator::new(policy).unwrap();
        let (note, class) = agg.compute_final_note(5.0, 5.0, 4.0, 4.0);
        assert_eq!(note, 4.5);
        assert_eq!(class, Classification::MuitoBom);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = ScoringPolicy {
            weights: NafWeights {
                individual: 50,
                team: 20,
                transversal: 20,
                technical: 20,
            },
            ..ScoringPolicy::default()
        };
        assert!(ScoreAggregator::new(policy).is_err());
    }

    #[test]
    fn test_evaluate_groups_by_category() {
        let agg = ScoreAggregator::default();
        let objectives = vec![
            make_objective(ObjectiveKind::Individual, Some(4.0)),
            make_objective(ObjectiveKind::Individual, Some(4.0)),
            make_objective(ObjectiveKind::Team, Some(4.5)),
        ];
        let competencies = vec![
            make_competency("teamwork", CompetencyKind::Transversal, 5.0),
            make_competency("rust", CompetencyKind::Technical, 3.0),
            make_competency("sql", CompetencyKind::Technical, 5.0),
        ];

        let breakdown = agg.evaluate(&objectives, &competencies).unwrap();
        assert_eq!(breakdown.averages.individual, 4.0);
        assert_eq!(breakdown.averages.team, 4.5);
        assert_eq!(breakdown.averages.transversal, 5.0);
        assert_eq!(breakdown.averages.technical, 4.0);
        assert_eq!(breakdown.final_note, 4.30);
        assert_eq!(breakdown.classification, Classification::Bom);
    }

    #[test]
    fn test_evaluate_reports_every_gap() {
        let agg = ScoreAggregator::default();
        let objectives = vec![make_objective(ObjectiveKind::Individual, None)];
        let competencies = vec![make_competency("rust", CompetencyKind::Technical, 6.0)];

        let EngineError::ValidationFailed { fields } =
            agg.evaluate(&objectives, &competencies).unwrap_err()
        else {
            panic!("expected ValidationFailed");
        };
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        assert!(names.iter().any(|n| n.ends_with(".score") && n.starts_with("objective:")));
        assert!(names.contains(&"competency:rust.score"));
        for category in [
            "individual_objectives",
            "team_objectives",
            "transversal_competencies",
            "technical_competencies",
        ] {
            assert!(names.contains(&category), "missing {category}");
        }
    }
}
