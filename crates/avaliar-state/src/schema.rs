//! Row layouts for the Avaliar SurrealDB tables
//!
//! Each row keeps the columns the store filters or version-checks on at the
//! top level and the full domain record under `record`. Reads select
//! `VALUE record`, so rows never have to be decoded back.
//!
//! Tables:
//! - cycles: evaluation cycles
//! - evaluations: one row per (cycle, subject, rater, kind)
//! - objectives: objectives owned by a (cycle, subject) pair
//! - competency_scores: competency ratings within an evaluation
//! - audit_log: append-only audit trail

use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    AuditLogEntry, AuditOutcome, CompetencyScoreRecord, CycleRecord, CycleState, EntityType,
    EvaluationKind, EvaluationRecord, EvaluationState, ObjectiveRecord,
};

/// `cycles` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRow {
    pub cycle_id: String,
    pub state: CycleState,
    pub version: u64,
    pub deleted: bool,
    pub record: CycleRecord,
}

impl From<CycleRecord> for CycleRow {
    fn from(record: CycleRecord) -> Self {
        Self {
            cycle_id: record.id.0.clone(),
            state: record.state,
            version: record.version,
            deleted: record.is_deleted(),
            record,
        }
    }
}

/// `evaluations` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub evaluation_id: String,
    pub cycle_id: String,
    pub subject_id: String,
    pub rater_id: String,
    pub kind: EvaluationKind,
    pub state: EvaluationState,
    pub version: u64,
    pub record: EvaluationRecord,
}

impl From<EvaluationRecord> for EvaluationRow {
    fn from(record: EvaluationRecord) -> Self {
        Self {
            evaluation_id: record.id.0.clone(),
            cycle_id: record.cycle_id.0.clone(),
            subject_id: record.subject_id.0.clone(),
            rater_id: record.rater_id.0.clone(),
            kind: record.kind,
            state: record.state,
            version: record.version,
            record,
        }
    }
}

/// `objectives` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveRow {
    pub objective_id: String,
    pub cycle_id: String,
    pub subject_id: String,
    pub version: u64,
    pub record: ObjectiveRecord,
}

impl From<ObjectiveRecord> for ObjectiveRow {
    fn from(record: ObjectiveRecord) -> Self {
        Self {
            objective_id: record.id.0.clone(),
            cycle_id: record.cycle_id.0.clone(),
            subject_id: record.subject_id.0.clone(),
            version: record.version,
            record,
        }
    }
}

/// `competency_scores` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetencyScoreRow {
    pub competency_score_id: String,
    pub evaluation_id: String,
    pub version: u64,
    pub record: CompetencyScoreRecord,
}

impl From<CompetencyScoreRecord> for CompetencyScoreRow {
    fn from(record: CompetencyScoreRecord) -> Self {
        Self {
            competency_score_id: record.id.0.clone(),
            evaluation_id: record.evaluation_id.0.clone(),
            version: record.version,
            record,
        }
    }
}

/// `audit_log` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub entry_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub outcome: AuditOutcome,
    pub record: AuditLogEntry,
}

impl From<AuditLogEntry> for AuditRow {
    fn from(record: AuditLogEntry) -> Self {
        Self {
            entry_id: record.id.0.clone(),
            entity_type: record.entity_type,
            entity_id: record.entity_id.clone(),
            actor_id: record.actor_id.as_ref().map(|a| a.0.clone()),
            outcome: record.outcome,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{CycleId, CycleKind};
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_cycle_row_mirrors_record_columns() {
        let record = CycleRecord {
            id: CycleId::from("c-2025"),
            year: 2025,
            semester: 1,
            kind: CycleKind::Annual,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            state: CycleState::Closed,
            version: 4,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let row = CycleRow::from(record);
        assert_eq!(row.cycle_id, "c-2025");
        assert_eq!(row.state, CycleState::Closed);
        assert_eq!(row.version, 4);
        assert!(!row.deleted);

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["record"]["year"], 2025);
    }
}
