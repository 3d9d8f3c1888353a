//! Evaluation state machine: `draft → submitted → homologated`, with
//! `submitted → draft` for corrections and `voided` reachable from `draft`
//! or `submitted`.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::instrument;

use avaliar_state::{
    CompetencyScoreId, CompetencyScoreRecord, CycleState, EntityType, EvaluationFilter,
    EvaluationId, EvaluationKind, EvaluationRecord, EvaluationState, EvaluationStore, WriteBatch,
};

use crate::audit::AuditRecorder;
use crate::domain::{CompetencyScoreInput, EngineError, NewEvaluation, Result};
use crate::engine::Engine;
use crate::obs;
use crate::permissions::{Operation, Principal, ScopeContext};

/// Whether the evaluation state machine has an edge `from → to`.
pub fn evaluation_transition_allowed(from: EvaluationState, to: EvaluationState) -> bool {
    use EvaluationState::*;

    matches!(
        (from, to),
        (Draft, Submitted)
            | (Submitted, Homologated)
            | (Submitted, Draft)
            | (Draft, Voided)
            | (Submitted, Voided)
    )
}

fn ensure_transition(from: EvaluationState, to: EvaluationState) -> Result<()> {
    if evaluation_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            entity: EntityType::Evaluation.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn scope_of(evaluation: &EvaluationRecord) -> ScopeContext {
    ScopeContext::from(evaluation.org_unit_id.clone())
}

impl<S> Engine<S>
where
    S: EvaluationStore,
{
    /// Create a `draft` evaluation inside an open cycle.
    #[instrument(
        skip(self, principal, draft),
        fields(principal = %principal.id, cycle_id = %draft.cycle_id, kind = %draft.kind)
    )]
    pub async fn create_evaluation(
        &self,
        principal: &Principal,
        draft: NewEvaluation,
    ) -> Result<EvaluationRecord> {
        let op = Operation::CreateEvaluation(draft.kind);
        let ctx = ScopeContext::from(draft.org_unit_id.clone());
        self.authorize(principal, op, &ctx, EntityType::Cycle, draft.cycle_id.as_str())
            .await?;
        draft.validate()?;

        let cycle = self.load_active_cycle(&draft.cycle_id).await?;
        if !cycle.state.accepts_work() {
            return Err(EngineError::invalid(
                "cycle_id",
                format!("cycle {} is {} and no longer accepts evaluations", cycle.id, cycle.state),
            ));
        }
        if draft.kind == EvaluationKind::MidpointReview
            && cycle.state != CycleState::MidCycleReview
        {
            return Err(EngineError::invalid(
                "kind",
                "midpoint reviews can only be created during the mid-cycle review",
            ));
        }

        let record = EvaluationRecord {
            id: EvaluationId::new(),
            cycle_id: draft.cycle_id,
            subject_id: draft.subject_id,
            rater_id: draft.rater_id,
            kind: draft.kind,
            org_unit_id: draft.org_unit_id,
            state: EvaluationState::Draft,
            final_note: None,
            classification: None,
            category_averages: None,
            created_at: Utc::now(),
            submitted_at: None,
            homologated_at: None,
            voided_at: None,
            version: 1,
        };

        let mut batch = WriteBatch::new();
        batch.create_evaluation(record.clone());
        // Rewriting the cycle at the version read makes a concurrent close fail
        // one of the two batches.
        let cycle_version = cycle.version;
        batch.update_cycle(cycle, cycle_version);
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Evaluation,
            record.id.as_str(),
            json!({
                "cycle_id": record.cycle_id,
                "subject_id": record.subject_id,
                "rater_id": record.rater_id,
                "kind": record.kind,
            }),
        );
        self.commit(batch).await?;

        obs::emit_evaluation_created(
            record.id.as_str(),
            record.kind.as_str(),
            record.cycle_id.as_str(),
        );
        Ok(record)
    }

    /// Upsert one competency score of a `draft` evaluation.
    ///
    /// `expected_version` refers to the evaluation; every score write bumps
    /// it so a concurrent submit cannot freeze a note over stale scores.
    #[instrument(
        skip(self, principal, input),
        fields(
            principal = %principal.id,
            evaluation_id = %evaluation_id,
            competency_id = %input.competency_id
        )
    )]
    pub async fn record_competency_score(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
        input: CompetencyScoreInput,
        expected_version: Option<u64>,
    ) -> Result<CompetencyScoreRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        let op = Operation::RecordCompetencyScore(evaluation.kind);
        self.authorize(
            principal,
            op,
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        self.check_version(
            EntityType::Evaluation,
            evaluation.id.as_str(),
            expected_version,
            evaluation.version,
        )?;
        if evaluation.state != EvaluationState::Draft {
            return Err(EngineError::invalid(
                "evaluation_id",
                format!(
                    "scores can only be recorded while the evaluation is draft (it is {})",
                    evaluation.state
                ),
            ));
        }

        let previous = self
            .store
            .find_competency_scores(&evaluation.id)
            .await?
            .into_iter()
            .find(|row| row.competency_id == input.competency_id);

        let now = Utc::now();
        let previous_score = previous.as_ref().map(|row| row.score);
        let (record, expected) = match previous {
            Some(prev) => {
                let expected = prev.version;
                let record = CompetencyScoreRecord {
                    kind: input.kind,
                    score: input.score.value(),
                    version: expected + 1,
                    updated_at: now,
                    ..prev
                };
                (record, Some(expected))
            }
            None => {
                let record = CompetencyScoreRecord {
                    id: CompetencyScoreId::new(),
                    evaluation_id: evaluation.id.clone(),
                    competency_id: input.competency_id,
                    kind: input.kind,
                    score: input.score.value(),
                    version: 1,
                    updated_at: now,
                };
                (record, None)
            }
        };

        let mut batch = WriteBatch::new();
        batch.put_competency_score(record.clone(), expected);
        let evaluation_version = evaluation.version;
        batch.update_evaluation(evaluation.clone(), evaluation_version);
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Evaluation,
            evaluation.id.as_str(),
            json!({
                "competency_id": record.competency_id,
                "kind": record.kind,
                "score": record.score,
                "previous_score": previous_score,
            }),
        );
        self.commit(batch).await?;
        Ok(record)
    }

    /// `draft → submitted`: compute and freeze the final note.
    ///
    /// Only the rater, or a system principal acting for the rater, may
    /// submit.
    #[instrument(
        skip(self, principal),
        fields(principal = %principal.id, evaluation_id = %evaluation_id)
    )]
    pub async fn submit(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
        expected_version: Option<u64>,
    ) -> Result<EvaluationRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        let op = Operation::SubmitEvaluation(evaluation.kind);
        self.authorize(
            principal,
            op,
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        if !principal.system && principal.id != evaluation.rater_id {
            let reason = format!(
                "only the rater {} or a system principal may submit",
                evaluation.rater_id
            );
            return Err(self
                .deny(principal, op, EntityType::Evaluation, evaluation.id.as_str(), reason)
                .await);
        }
        self.check_version(
            EntityType::Evaluation,
            evaluation.id.as_str(),
            expected_version,
            evaluation.version,
        )?;
        ensure_transition(evaluation.state, EvaluationState::Submitted)?;

        let objectives = self
            .store
            .find_objectives(&evaluation.cycle_id, Some(&evaluation.subject_id))
            .await?;
        let competencies = self.store.find_competency_scores(&evaluation.id).await?;
        let breakdown = self.aggregator.evaluate(&objectives, &competencies)?;

        let mut updated = evaluation.clone();
        updated.state = EvaluationState::Submitted;
        updated.final_note = Some(breakdown.final_note);
        updated.classification = Some(breakdown.classification);
        updated.category_averages = Some(breakdown.averages);
        updated.submitted_at = Some(Utc::now());

        let metadata = json!({
            "final_note": breakdown.final_note,
            "classification": breakdown.classification,
            "category_averages": breakdown.averages,
            "objectives": objectives.len(),
            "competencies": competencies.len(),
        });
        let updated = self
            .commit_evaluation_transition(principal, op, &evaluation, updated, metadata)
            .await?;
        obs::emit_note_frozen(
            updated.id.as_str(),
            breakdown.final_note,
            breakdown.classification.label(),
        );
        Ok(updated)
    }

    /// `submitted → homologated`. The frozen note is kept as is.
    #[instrument(
        skip(self, principal),
        fields(principal = %principal.id, evaluation_id = %evaluation_id)
    )]
    pub async fn homologate(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
        expected_version: Option<u64>,
    ) -> Result<EvaluationRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        let op = Operation::HomologateEvaluation;
        self.authorize(
            principal,
            op,
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        self.check_version(
            EntityType::Evaluation,
            evaluation.id.as_str(),
            expected_version,
            evaluation.version,
        )?;
        ensure_transition(evaluation.state, EvaluationState::Homologated)?;

        let mut updated = evaluation.clone();
        updated.state = EvaluationState::Homologated;
        updated.homologated_at = Some(Utc::now());

        let metadata = json!({
            "final_note": evaluation.final_note,
            "classification": evaluation.classification,
        });
        self.commit_evaluation_transition(principal, op, &evaluation, updated, metadata)
            .await
    }

    /// `submitted → draft`, clearing everything frozen at submission.
    #[instrument(
        skip(self, principal, reason),
        fields(principal = %principal.id, evaluation_id = %evaluation_id)
    )]
    pub async fn return_for_correction(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
        reason: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<EvaluationRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        let op = Operation::ReturnForCorrection;
        self.authorize(
            principal,
            op,
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        self.check_version(
            EntityType::Evaluation,
            evaluation.id.as_str(),
            expected_version,
            evaluation.version,
        )?;
        ensure_transition(evaluation.state, EvaluationState::Draft)?;

        let mut updated = evaluation.clone();
        updated.state = EvaluationState::Draft;
        updated.submitted_at = None;
        updated.final_note = None;
        updated.classification = None;
        updated.category_averages = None;

        let metadata = json!({
            "reason": reason,
            "previous_note": evaluation.final_note,
        });
        self.commit_evaluation_transition(principal, op, &evaluation, updated, metadata)
            .await
    }

    /// Void a `draft` or `submitted` evaluation. The reason is mandatory and
    /// kept in the audit entry.
    #[instrument(
        skip(self, principal, reason),
        fields(principal = %principal.id, evaluation_id = %evaluation_id)
    )]
    pub async fn void(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
        reason: &str,
        expected_version: Option<u64>,
    ) -> Result<EvaluationRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        let op = Operation::VoidEvaluation(evaluation.kind);
        self.authorize(
            principal,
            op,
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        if reason.trim().is_empty() {
            return Err(EngineError::invalid("reason", "a reason is required to void"));
        }
        self.check_version(
            EntityType::Evaluation,
            evaluation.id.as_str(),
            expected_version,
            evaluation.version,
        )?;
        ensure_transition(evaluation.state, EvaluationState::Voided)?;

        let mut updated = evaluation.clone();
        updated.state = EvaluationState::Voided;
        updated.voided_at = Some(Utc::now());

        let metadata = json!({ "reason": reason.trim() });
        self.commit_evaluation_transition(principal, op, &evaluation, updated, metadata)
            .await
    }

    /// Fetch one evaluation.
    pub async fn get_evaluation(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
    ) -> Result<EvaluationRecord> {
        let evaluation = self.store.get_evaluation(evaluation_id).await?;
        self.authorize(
            principal,
            Operation::ViewEvaluation(evaluation.kind),
            &scope_of(&evaluation),
            EntityType::Evaluation,
            evaluation.id.as_str(),
        )
        .await?;
        Ok(evaluation)
    }

    /// Competency scores recorded for one evaluation.
    pub async fn competency_scores(
        &self,
        principal: &Principal,
        evaluation_id: &EvaluationId,
    ) -> Result<Vec<CompetencyScoreRecord>> {
        let evaluation = self.get_evaluation(principal, evaluation_id).await?;
        Ok(self.store.find_competency_scores(&evaluation.id).await?)
    }

    /// Evaluations matching `filter`, restricted to those `principal` may
    /// view. Unlike single lookups, hidden rows are skipped rather than
    /// audited as denials.
    pub async fn list_evaluations(
        &self,
        principal: &Principal,
        filter: &EvaluationFilter,
    ) -> Result<Vec<EvaluationRecord>> {
        let rows = self.store.find_evaluations(filter).await?;
        Ok(rows
            .into_iter()
            .filter(|ev| {
                let permission = Operation::ViewEvaluation(ev.kind).required_permission();
                self.matrix
                    .authorize(principal, permission.module, permission.action, &scope_of(ev))
                    .is_allowed()
            })
            .collect())
    }

    async fn commit_evaluation_transition(
        &self,
        principal: &Principal,
        op: Operation,
        before: &EvaluationRecord,
        mut after: EvaluationRecord,
        metadata: Value,
    ) -> Result<EvaluationRecord> {
        after.version = before.version + 1;

        let mut audit = json!({
            "from": before.state,
            "to": after.state,
            "version": after.version,
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut audit, metadata) {
            target.extend(extra);
        }

        let mut batch = WriteBatch::new();
        batch.update_evaluation(after.clone(), before.version);
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Evaluation,
            after.id.as_str(),
            audit,
        );
        self.commit(batch).await?;

        obs::emit_evaluation_transitioned(
            after.id.as_str(),
            before.state.as_str(),
            after.state.as_str(),
            after.version,
        );
        Ok(after)
    }
}
