//! SurrealDB-backed EvaluationStore implementation
//!
//! Reads select the embedded `record` column of each row. A `WriteBatch` is
//! rendered into one `BEGIN TRANSACTION ... COMMIT TRANSACTION` script; guard
//! statements `THROW` a tagged message (`avaliar:<kind>|...`) when a version
//! check or the evaluation uniqueness check fails, which aborts the whole
//! transaction and is mapped back to a `StorageError` here. Two batches that
//! pass their guards in parallel collide at commit instead; SurrealDB reports
//! that as a retryable read/write conflict, which maps to the same
//! `ConcurrentModification` as a failed guard.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::handle;
use crate::schema::{AuditRow, CompetencyScoreRow, CycleRow, EvaluationRow, ObjectiveRow};
use crate::storage_traits::*;

const THROW_TAG: &str = "avaliar:";

/// Fragments of SurrealDB's optimistic-commit failure messages.
const RETRYABLE_CONFLICT_MARKERS: [&str; 3] = [
    "read or write conflict",
    "can be retried",
    "transaction conflict",
];

/// SurrealDB-backed implementation of [`EvaluationStore`].
#[derive(Clone)]
pub struct SurrealEvaluationStore {
    db: Surreal<Any>,
}

impl SurrealEvaluationStore {
    /// Wrap an already connected and migrated database.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(handle::connect_memory().await?))
    }

    /// Create from environment variables (see [`handle::connect_from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        Ok(Self::new(handle::connect_from_env().await?))
    }

    // -- private helpers -----------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        sql: String,
        params: BTreeMap<String, Value>,
    ) -> StorageResult<Vec<T>> {
        let mut res = self
            .db
            .query(sql)
            .bind(params)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        res.take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        id: &str,
        entity_type: EntityType,
    ) -> StorageResult<T> {
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), Value::String(id.to_string()));
        let rows: Vec<T> = self
            .select(
                format!("SELECT VALUE record FROM {table} WHERE {column} = $id"),
                params,
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }
}

/// Builder for one transactional SurrealQL script.
#[derive(Default)]
struct CommitScript {
    statements: Vec<String>,
    params: BTreeMap<String, Value>,
    /// First versioned row of the batch; blamed when the commit itself
    /// loses a write conflict.
    conflict_target: Option<VersionGuard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionGuard {
    entity_type: EntityType,
    id: String,
    expected_version: u64,
}

impl CommitScript {
    fn bind(&mut self, name: String, value: impl Serialize) -> StorageResult<()> {
        self.params.insert(name, serde_json::to_value(value)?);
        Ok(())
    }

    fn create(&mut self, i: usize, table: &str, row: impl Serialize) -> StorageResult<()> {
        self.bind(format!("row{i}"), row)?;
        self.statements
            .push(format!("CREATE {table} CONTENT $row{i};"));
        Ok(())
    }

    fn versioned_update(
        &mut self,
        i: usize,
        table: &str,
        column: &str,
        entity_type: EntityType,
        id: &str,
        expected_version: u64,
        row: impl Serialize,
    ) -> StorageResult<()> {
        if self.conflict_target.is_none() {
            self.conflict_target = Some(VersionGuard {
                entity_type,
                id: id.to_string(),
                expected_version,
            });
        }
        self.bind(format!("id{i}"), id)?;
        self.bind(format!("exp{i}"), expected_version)?;
        self.bind(format!("row{i}"), row)?;
        self.statements.push(format!(
            "LET $cur{i} = (SELECT VALUE version FROM {table} WHERE {column} = $id{i});"
        ));
        self.statements.push(format!(
            "IF array::len($cur{i}) == 0 {{ THROW \"{THROW_TAG}not_found|{entity_type}|\" + $id{i}; }};"
        ));
        self.statements.push(format!(
            "IF $cur{i}[0] != $exp{i} {{ THROW \"{THROW_TAG}conflict|{entity_type}|\" + $id{i} + \"|\" + <string> $exp{i} + \"|\" + <string> $cur{i}[0]; }};"
        ));
        self.statements
            .push(format!("UPDATE {table} CONTENT $row{i} WHERE {column} = $id{i};"));
        Ok(())
    }

    fn unique_evaluation_guard(&mut self, i: usize, key: &EvaluationKey) -> StorageResult<()> {
        self.bind(format!("kc{i}"), key.cycle_id.as_str())?;
        self.bind(format!("ks{i}"), key.subject_id.as_str())?;
        self.bind(format!("kr{i}"), key.rater_id.as_str())?;
        self.bind(format!("kk{i}"), key.kind)?;
        self.bind(format!("key{i}"), key.to_string())?;
        self.statements.push(format!(
            "IF array::len((SELECT VALUE evaluation_id FROM evaluations WHERE cycle_id = $kc{i} AND subject_id = $ks{i} AND rater_id = $kr{i} AND kind = $kk{i})) > 0 {{ THROW \"{THROW_TAG}duplicate|\" + $key{i}; }};"
        ));
        Ok(())
    }

    fn render(self) -> (String, BTreeMap<String, Value>, Option<VersionGuard>) {
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for stmt in self.statements {
            sql.push_str(&stmt);
            sql.push('\n');
        }
        sql.push_str("COMMIT TRANSACTION;");
        (sql, self.params, self.conflict_target)
    }
}

fn is_retryable_conflict(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    RETRYABLE_CONFLICT_MARKERS
        .iter()
        .any(|marker| msg.contains(marker))
}

/// Map a failed transaction's error messages back to a `StorageError`.
fn classify_commit_errors(messages: &[String], target: Option<&VersionGuard>) -> StorageError {
    for msg in messages {
        let Some(start) = msg.find(THROW_TAG) else {
            continue;
        };
        let tagged = msg[start + THROW_TAG.len()..].trim_end_matches(['`', '"', '\'', ' ']);
        let parts: Vec<&str> = tagged.split('|').collect();
        match parts.as_slice() {
            ["conflict", entity_type, id, expected, actual] => {
                return StorageError::ConcurrentModification {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                    expected: expected.parse().unwrap_or_default(),
                    actual: actual.parse().unwrap_or_default(),
                }
            }
            ["not_found", entity_type, id] => {
                return StorageError::NotFound {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                }
            }
            ["duplicate", key] => {
                return StorageError::DuplicateEvaluation {
                    key: key.to_string(),
                }
            }
            _ => {}
        }
    }

    // Unique index backstops.
    for msg in messages {
        if msg.contains("idx_evaluation_key") {
            return StorageError::DuplicateEvaluation { key: msg.clone() };
        }
        for (index, entity_type) in [
            ("idx_cycle_id", EntityType::Cycle),
            ("idx_evaluation_id", EntityType::Evaluation),
            ("idx_objective_id", EntityType::Objective),
            ("idx_competency_score_id", EntityType::CompetencyScore),
            ("idx_audit_entry_id", EntityType::AuditLogEntry),
        ] {
            if msg.contains(index) {
                return StorageError::AlreadyExists {
                    entity_type: entity_type.to_string(),
                    id: msg.clone(),
                };
            }
        }
    }

    if let Some(target) = target {
        if messages.iter().any(|msg| is_retryable_conflict(msg)) {
            // The winner committed at least one version past ours.
            return StorageError::ConcurrentModification {
                entity_type: target.entity_type.to_string(),
                id: target.id.clone(),
                expected: target.expected_version,
                actual: target.expected_version + 1,
            };
        }
    }

    StorageError::Backend(messages.join("; "))
}

#[async_trait]
impl EvaluationStore for SurrealEvaluationStore {
    async fn get_cycle(&self, id: &CycleId) -> StorageResult<CycleRecord> {
        self.select_one("cycles", "cycle_id", id.as_str(), EntityType::Cycle)
            .await
    }

    async fn list_cycles(&self, include_deleted: bool) -> StorageResult<Vec<CycleRecord>> {
        let sql = if include_deleted {
            "SELECT VALUE record FROM cycles"
        } else {
            "SELECT VALUE record FROM cycles WHERE deleted = false"
        };
        let mut cycles: Vec<CycleRecord> = self.select(sql.to_string(), BTreeMap::new()).await?;
        cycles.sort_by(|a, b| {
            b.year
                .cmp(&a.year)
                .then(b.semester.cmp(&a.semester))
                .then(a.id.cmp(&b.id))
        });
        Ok(cycles)
    }

    async fn get_evaluation(&self, id: &EvaluationId) -> StorageResult<EvaluationRecord> {
        self.select_one(
            "evaluations",
            "evaluation_id",
            id.as_str(),
            EntityType::Evaluation,
        )
        .await
    }

    async fn find_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> StorageResult<Vec<EvaluationRecord>> {
        let mut clauses = Vec::new();
        let mut params = BTreeMap::new();
        if let Some(cycle_id) = &filter.cycle_id {
            clauses.push("cycle_id = $cycle_id");
            params.insert("cycle_id".to_string(), Value::String(cycle_id.0.clone()));
        }
        if let Some(subject_id) = &filter.subject_id {
            clauses.push("subject_id = $subject_id");
            params.insert("subject_id".to_string(), Value::String(subject_id.0.clone()));
        }
        if let Some(rater_id) = &filter.rater_id {
            clauses.push("rater_id = $rater_id");
            params.insert("rater_id".to_string(), Value::String(rater_id.0.clone()));
        }
        if let Some(kind) = filter.kind {
            clauses.push("kind = $kind");
            params.insert("kind".to_string(), serde_json::to_value(kind)?);
        }
        if let Some(state) = filter.state {
            clauses.push("state = $state");
            params.insert("state".to_string(), serde_json::to_value(state)?);
        }

        let mut sql = String::from("SELECT VALUE record FROM evaluations");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut found: Vec<EvaluationRecord> = self.select(sql, params).await?;
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get_objective(&self, id: &ObjectiveId) -> StorageResult<ObjectiveRecord> {
        self.select_one(
            "objectives",
            "objective_id",
            id.as_str(),
            EntityType::Objective,
        )
        .await
    }

    async fn find_objectives(
        &self,
        cycle_id: &CycleId,
        subject_id: Option<&PrincipalId>,
    ) -> StorageResult<Vec<ObjectiveRecord>> {
        let mut params = BTreeMap::new();
        params.insert("cycle_id".to_string(), Value::String(cycle_id.0.clone()));
        let sql = match subject_id {
            Some(subject_id) => {
                params.insert("subject_id".to_string(), Value::String(subject_id.0.clone()));
                "SELECT VALUE record FROM objectives WHERE cycle_id = $cycle_id AND subject_id = $subject_id"
            }
            None => "SELECT VALUE record FROM objectives WHERE cycle_id = $cycle_id",
        };
        let mut found: Vec<ObjectiveRecord> = self.select(sql.to_string(), params).await?;
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn find_competency_scores(
        &self,
        evaluation_id: &EvaluationId,
    ) -> StorageResult<Vec<CompetencyScoreRecord>> {
        let mut params = BTreeMap::new();
        params.insert(
            "evaluation_id".to_string(),
            Value::String(evaluation_id.0.clone()),
        );
        let mut found: Vec<CompetencyScoreRecord> = self
            .select(
                "SELECT VALUE record FROM competency_scores WHERE evaluation_id = $evaluation_id"
                    .to_string(),
                params,
            )
            .await?;
        found.sort_by(|a, b| a.competency_id.cmp(&b.competency_id));
        Ok(found)
    }

    async fn list_audit_entries(&self, filter: &AuditFilter) -> StorageResult<Vec<AuditLogEntry>> {
        let mut clauses = Vec::new();
        let mut params = BTreeMap::new();
        if let Some(entity_type) = filter.entity_type {
            clauses.push("entity_type = $entity_type");
            params.insert("entity_type".to_string(), serde_json::to_value(entity_type)?);
        }
        if let Some(entity_id) = &filter.entity_id {
            clauses.push("entity_id = $entity_id");
            params.insert("entity_id".to_string(), Value::String(entity_id.clone()));
        }
        if let Some(actor_id) = &filter.actor_id {
            clauses.push("actor_id = $actor_id");
            params.insert("actor_id".to_string(), Value::String(actor_id.0.clone()));
        }
        if let Some(outcome) = filter.outcome {
            clauses.push("outcome = $outcome");
            params.insert("outcome".to_string(), serde_json::to_value(outcome)?);
        }

        let mut sql = String::from("SELECT VALUE record FROM audit_log");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut entries: Vec<AuditLogEntry> = self.select(sql, params).await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut script = CommitScript::default();
        for (i, op) in batch.into_ops().into_iter().enumerate() {
            match op {
                WriteOp::CreateCycle(mut record) => {
                    record.version = 1;
                    script.create(i, "cycles", CycleRow::from(record))?;
                }
                WriteOp::UpdateCycle {
                    mut record,
                    expected_version,
                } => {
                    record.version = expected_version + 1;
                    let id = record.id.0.clone();
                    script.versioned_update(
                        i,
                        "cycles",
                        "cycle_id",
                        EntityType::Cycle,
                        &id,
                        expected_version,
                        CycleRow::from(record),
                    )?;
                }
                WriteOp::CreateEvaluation(mut record) => {
                    record.version = 1;
                    script.unique_evaluation_guard(i, &record.key())?;
                    script.create(i, "evaluations", EvaluationRow::from(record))?;
                }
                WriteOp::UpdateEvaluation {
                    mut record,
                    expected_version,
                } => {
                    record.version = expected_version + 1;
                    let id = record.id.0.clone();
                    script.versioned_update(
                        i,
                        "evaluations",
                        "evaluation_id",
                        EntityType::Evaluation,
                        &id,
                        expected_version,
                        EvaluationRow::from(record),
                    )?;
                }
                WriteOp::PutObjective {
                    mut record,
                    expected_version,
                } => match expected_version {
                    None => {
                        record.version = 1;
                        script.create(i, "objectives", ObjectiveRow::from(record))?;
                    }
                    Some(expected) => {
                        record.version = expected + 1;
                        let id = record.id.0.clone();
                        script.versioned_update(
                            i,
                            "objectives",
                            "objective_id",
                            EntityType::Objective,
                            &id,
                            expected,
                            ObjectiveRow::from(record),
                        )?;
                    }
                },
                WriteOp::PutCompetencyScore {
                    mut record,
                    expected_version,
                } => match expected_version {
                    None => {
                        record.version = 1;
                        script.create(i, "competency_scores", CompetencyScoreRow::from(record))?;
                    }
                    Some(expected) => {
                        record.version = expected + 1;
                        let id = record.id.0.clone();
                        script.versioned_update(
                            i,
                            "competency_scores",
                            "competency_score_id",
                            EntityType::CompetencyScore,
                            &id,
                            expected,
                            CompetencyScoreRow::from(record),
                        )?;
                    }
                },
                WriteOp::AppendAudit(entry) => {
                    script.create(i, "audit_log", AuditRow::from(entry))?;
                }
            }
        }

        let (sql, params, target) = script.render();
        debug!(statements = sql.lines().count(), "committing write batch");

        let mut response = self
            .db
            .query(sql)
            .bind(params)
            .await
            .map_err(|e| classify_commit_errors(&[e.to_string()], target.as_ref()))?;

        let errors = response.take_errors();
        if errors.is_empty() {
            return Ok(());
        }

        let mut indexed: Vec<(usize, String)> = errors
            .into_iter()
            .map(|(idx, err)| (idx, err.to_string()))
            .collect();
        indexed.sort_by_key(|(idx, _)| *idx);
        let messages: Vec<String> = indexed.into_iter().map(|(_, msg)| msg).collect();
        let err = classify_commit_errors(&messages, target.as_ref());
        warn!(error = %err, "write batch rejected");
        Err(err)
    }
}
