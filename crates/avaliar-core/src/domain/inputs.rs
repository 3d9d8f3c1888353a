//! Operation payloads accepted by the engine, validated before any write.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use avaliar_state::{
    CompetencyId, CompetencyKind, CycleId, CycleKind, EvaluationKind, ObjectiveId,
    ObjectiveKind, OrgUnitId, PrincipalId,
};

use super::error::{EngineError, FieldIssue, Result};
use super::score::Score;

fn finish(issues: Vec<FieldIssue>) -> Result<()> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(EngineError::ValidationFailed { fields: issues })
    }
}

/// Payload for creating an evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCycle {
    /// Caller-chosen id; a random one is generated when absent.
    #[serde(default)]
    pub id: Option<CycleId>,
    pub year: i32,
    pub semester: u8,
    pub kind: CycleKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewCycle {
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if !(1970..=9999).contains(&self.year) {
            issues.push(FieldIssue::new("year", format!("{} is not a valid year", self.year)));
        }
        if !(1..=2).contains(&self.semester) {
            issues.push(FieldIssue::new("semester", "must be 1 or 2"));
        }
        if self.start_date >= self.end_date {
            issues.push(FieldIssue::new("end_date", "must be after start_date"));
        }
        if self.id.as_ref().is_some_and(|id| id.as_str().trim().is_empty()) {
            issues.push(FieldIssue::new("id", "must not be blank"));
        }
        finish(issues)
    }
}

/// Payload for creating an evaluation draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    pub cycle_id: CycleId,
    pub subject_id: PrincipalId,
    pub rater_id: PrincipalId,
    pub kind: EvaluationKind,
    #[serde(default)]
    pub org_unit_id: Option<OrgUnitId>,
}

impl NewEvaluation {
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        for (field, value) in [
            ("cycle_id", self.cycle_id.as_str()),
            ("subject_id", self.subject_id.as_str()),
            ("rater_id", self.rater_id.as_str()),
        ] {
            if value.trim().is_empty() {
                issues.push(FieldIssue::new(field, "must not be blank"));
            }
        }
        finish(issues)
    }
}

/// Payload for creating or updating an objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveInput {
    /// Existing objective to update; a new objective is created when absent.
    #[serde(default)]
    pub id: Option<ObjectiveId>,
    pub cycle_id: CycleId,
    pub subject_id: PrincipalId,
    /// Org unit claimed for a subject with no evaluation or objective in
    /// the cycle yet. Otherwise it must match the stored one.
    #[serde(default)]
    pub org_unit_id: Option<OrgUnitId>,
    pub kind: ObjectiveKind,
    pub description: String,
    pub planned_target: f64,
    #[serde(default)]
    pub achieved_target: Option<f64>,
    #[serde(default)]
    pub score: Option<Score>,
}

impl ObjectiveInput {
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if self.description.trim().is_empty() {
            issues.push(FieldIssue::new("description", "must not be blank"));
        }
        if !self.planned_target.is_finite() || self.planned_target < 0.0 {
            issues.push(FieldIssue::new(
                "planned_target",
                "must be a non-negative number",
            ));
        }
        if self
            .achieved_target
            .is_some_and(|v| !v.is_finite() || v < 0.0)
        {
            issues.push(FieldIssue::new(
                "achieved_target",
                "must be a non-negative number",
            ));
        }
        finish(issues)
    }
}

/// Payload for recording one competency score within an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyScoreInput {
    pub competency_id: CompetencyId,
    pub kind: CompetencyKind,
    pub score: Score,
}
