//! In-memory fake for the storage trait (testing only)
//!
//! Provides `MemoryEvaluationStore`, which satisfies the `EvaluationStore`
//! contract without any external dependencies. Batches are applied to a
//! staged copy of the tables and swapped in only when every op succeeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default, Clone)]
struct Tables {
    cycles: HashMap<String, CycleRecord>,
    evaluations: HashMap<String, EvaluationRecord>,
    objectives: HashMap<String, ObjectiveRecord>,
    competency_scores: HashMap<String, CompetencyScoreRecord>,
    audit: Vec<AuditLogEntry>,
}

fn not_found(entity_type: EntityType, id: &str) -> StorageError {
    StorageError::NotFound {
        entity_type: entity_type.to_string(),
        id: id.to_string(),
    }
}

fn check_version(
    entity_type: EntityType,
    id: &str,
    expected: u64,
    actual: u64,
) -> StorageResult<()> {
    if expected != actual {
        return Err(StorageError::ConcurrentModification {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl Tables {
    fn apply(&mut self, op: WriteOp) -> StorageResult<()> {
        match op {
            WriteOp::CreateCycle(mut record) => {
                if self.cycles.contains_key(record.id.as_str()) {
                    return Err(StorageError::AlreadyExists {
                        entity_type: EntityType::Cycle.to_string(),
                        id: record.id.0,
                    });
                }
                record.version = 1;
                self.cycles.insert(record.id.0.clone(), record);
            }
            WriteOp::UpdateCycle {
                mut record,
                expected_version,
            } => {
                let current = self
                    .cycles
                    .get(record.id.as_str())
                    .ok_or_else(|| not_found(EntityType::Cycle, record.id.as_str()))?;
                check_version(
                    EntityType::Cycle,
                    record.id.as_str(),
                    expected_version,
                    current.version,
                )?;
                record.version = expected_version + 1;
                self.cycles.insert(record.id.0.clone(), record);
            }
            WriteOp::CreateEvaluation(mut record) => {
                if self.evaluations.contains_key(record.id.as_str()) {
                    return Err(StorageError::AlreadyExists {
                        entity_type: EntityType::Evaluation.to_string(),
                        id: record.id.0,
                    });
                }
                let key = record.key();
                if self.evaluations.values().any(|e| e.key() == key) {
                    return Err(StorageError::DuplicateEvaluation {
                        key: key.to_string(),
                    });
                }
                record.version = 1;
                self.evaluations.insert(record.id.0.clone(), record);
            }
            WriteOp::UpdateEvaluation {
                mut record,
                expected_version,
            } => {
                let current = self
                    .evaluations
                    .get(record.id.as_str())
                    .ok_or_else(|| not_found(EntityType::Evaluation, record.id.as_str()))?;
                check_version(
                    EntityType::Evaluation,
                    record.id.as_str(),
                    expected_version,
                    current.version,
                )?;
                record.version = expected_version + 1;
                self.evaluations.insert(record.id.0.clone(), record);
            }
            WriteOp::PutObjective {
                mut record,
                expected_version,
            } => {
                let current = self.objectives.get(record.id.as_str());
                match (expected_version, current) {
                    (None, Some(_)) => {
                        return Err(StorageError::AlreadyExists {
                            entity_type: EntityType::Objective.to_string(),
                            id: record.id.0,
                        })
                    }
                    (None, None) => record.version = 1,
                    (Some(_), None) => {
                        return Err(not_found(EntityType::Objective, record.id.as_str()))
                    }
                    (Some(expected), Some(current)) => {
                        check_version(
                            EntityType::Objective,
                            record.id.as_str(),
                            expected,
                            current.version,
                        )?;
                        record.version = expected + 1;
                    }
                }
                self.objectives.insert(record.id.0.clone(), record);
            }
            WriteOp::PutCompetencyScore {
                mut record,
                expected_version,
            } => {
                let current = self.competency_scores.get(record.id.as_str());
                match (expected_version, current) {
                    (None, Some(_)) => {
                        return Err(StorageError::AlreadyExists {
                            entity_type: EntityType::CompetencyScore.to_string(),
                            id: record.id.0,
                        })
                    }
                    (None, None) => record.version = 1,
                    (Some(_), None) => {
                        return Err(not_found(
                            EntityType::CompetencyScore,
                            record.id.as_str(),
                        ))
                    }
                    (Some(expected), Some(current)) => {
                        check_version(
                            EntityType::CompetencyScore,
                            record.id.as_str(),
                            expected,
                            current.version,
                        )?;
                        record.version = expected + 1;
                    }
                }
                self.competency_scores.insert(record.id.0.clone(), record);
            }
            WriteOp::AppendAudit(entry) => {
                self.audit.push(entry);
            }
        }
        Ok(())
    }
}

/// In-memory evaluation store backed by `HashMap`s behind one `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryEvaluationStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl MemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with a backend error after validation,
    /// leaving the tables untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of audit entries stored so far.
    pub fn audit_len(&self) -> usize {
        self.tables.lock().unwrap().audit.len()
    }
}

#[async_trait]
impl EvaluationStore for MemoryEvaluationStore {
    async fn get_cycle(&self, id: &CycleId) -> StorageResult<CycleRecord> {
        let tables = self.tables.lock().unwrap();
        tables
            .cycles
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| not_found(EntityType::Cycle, id.as_str()))
    }

    async fn list_cycles(&self, include_deleted: bool) -> StorageResult<Vec<CycleRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut cycles: Vec<CycleRecord> = tables
            .cycles
            .values()
            .filter(|c| include_deleted || !c.is_deleted())
            .cloned()
            .collect();
        cycles.sort_by(|a, b| {
            b.year
                .cmp(&a.year)
                .then(b.semester.cmp(&a.semester))
                .then(a.id.cmp(&b.id))
        });
        Ok(cycles)
    }

    async fn get_evaluation(&self, id: &EvaluationId) -> StorageResult<EvaluationRecord> {
        let tables = self.tables.lock().unwrap();
        tables
            .evaluations
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| not_found(EntityType::Evaluation, id.as_str()))
    }

    async fn find_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> StorageResult<Vec<EvaluationRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut found: Vec<EvaluationRecord> = tables
            .evaluations
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get_objective(&self, id: &ObjectiveId) -> StorageResult<ObjectiveRecord> {
        let tables = self.tables.lock().unwrap();
        tables
            .objectives
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| not_found(EntityType::Objective, id.as_str()))
    }

    async fn find_objectives(
        &self,
        cycle_id: &CycleId,
        subject_id: Option<&PrincipalId>,
    ) -> StorageResult<Vec<ObjectiveRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut found: Vec<ObjectiveRecord> = tables
            .objectives
            .values()
            .filter(|o| o.cycle_id == *cycle_id && subject_id.is_none_or(|s| o.subject_id == *s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn find_competency_scores(
        &self,
        evaluation_id: &EvaluationId,
    ) -> StorageResult<Vec<CompetencyScoreRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut found: Vec<CompetencyScoreRecord> = tables
            .competency_scores
            .values()
            .filter(|c| c.evaluation_id == *evaluation_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.competency_id.cmp(&b.competency_id));
        Ok(found)
    }

    async fn list_audit_entries(&self, filter: &AuditFilter) -> StorageResult<Vec<AuditLogEntry>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .audit
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let mut staged = tables.clone();
        for op in batch.into_ops() {
            staged.apply(op)?;
        }
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("injected commit failure".to_string()));
        }
        *tables = staged;
        Ok(())
    }
}
