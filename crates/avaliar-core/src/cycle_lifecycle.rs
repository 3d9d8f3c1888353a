//! Cycle lifecycle: `open → mid_cycle_review → closed → homologated`,
//! soft deletion, and the objectives owned by a cycle and subject.

use chrono::Utc;
use serde_json::json;
use tracing::{instrument, warn};

use avaliar_state::{
    CycleId, CycleRecord, CycleState, EntityType, EvaluationFilter, EvaluationRecord,
    EvaluationState, EvaluationStore, ObjectiveId, ObjectiveRecord, OrgUnitId, PrincipalId,
    WriteBatch,
};

use crate::audit::AuditRecorder;
use crate::domain::{EngineError, NewCycle, ObjectiveInput, Result};
use crate::engine::Engine;
use crate::obs;
use crate::permissions::{Operation, Principal, ScopeContext};
use crate::reporting::{summarize, CycleSummary};
use crate::scoring::completion_pct;

/// Whether the cycle state machine has an edge `from → to`. The lifecycle
/// is linear.
pub fn cycle_transition_allowed(from: CycleState, to: CycleState) -> bool {
    use CycleState::*;

    matches!(
        (from, to),
        (Open, MidCycleReview) | (MidCycleReview, Closed) | (Closed, Homologated)
    )
}

fn ensure_transition(from: CycleState, to: CycleState) -> Result<()> {
    if cycle_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            entity: EntityType::Cycle.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl<S> Engine<S>
where
    S: EvaluationStore,
{
    /// Create a cycle in `open`.
    #[instrument(
        skip(self, principal, input),
        fields(principal = %principal.id, year = input.year)
    )]
    pub async fn create_cycle(
        &self,
        principal: &Principal,
        input: NewCycle,
    ) -> Result<CycleRecord> {
        let op = Operation::CreateCycle;
        let target = input
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{}-s{}", input.year, input.semester));
        self.authorize(principal, op, &ScopeContext::global(), EntityType::Cycle, &target)
            .await?;
        input.validate()?;

        let record = CycleRecord {
            id: input.id.unwrap_or_default(),
            year: input.year,
            semester: input.semester,
            kind: input.kind,
            start_date: input.start_date,
            end_date: input.end_date,
            state: CycleState::Open,
            version: 1,
            created_at: Utc::now(),
            deleted_at: None,
        };

        let mut batch = WriteBatch::new();
        batch.create_cycle(record.clone());
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Cycle,
            record.id.as_str(),
            json!({
                "year": record.year,
                "semester": record.semester,
                "kind": record.kind,
                "start_date": record.start_date,
                "end_date": record.end_date,
            }),
        );
        self.commit(batch).await?;
        Ok(record)
    }

    /// `open → mid_cycle_review`.
    pub async fn start_mid_cycle_review(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        expected_version: Option<u64>,
    ) -> Result<CycleRecord> {
        self.advance_cycle(
            principal,
            cycle_id,
            Operation::StartMidCycleReview,
            CycleState::MidCycleReview,
            expected_version,
        )
        .await
    }

    /// `mid_cycle_review → closed`. Fails with `CycleNotReady` while any
    /// evaluation of the cycle is still `draft` or `submitted`.
    pub async fn close_cycle(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        expected_version: Option<u64>,
    ) -> Result<CycleRecord> {
        self.advance_cycle(
            principal,
            cycle_id,
            Operation::CloseCycle,
            CycleState::Closed,
            expected_version,
        )
        .await
    }

    /// `closed → homologated`, then hand the cycle summary to the reporting
    /// hook.
    pub async fn homologate_cycle(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        expected_version: Option<u64>,
    ) -> Result<CycleRecord> {
        let cycle = self
            .advance_cycle(
                principal,
                cycle_id,
                Operation::HomologateCycle,
                CycleState::Homologated,
                expected_version,
            )
            .await?;

        if let Some(hook) = &self.reporting_hook {
            // The transition is committed; a failed read only skips the hook.
            match self
                .store
                .find_evaluations(&EvaluationFilter::for_cycle(&cycle.id))
                .await
            {
                Ok(evaluations) => {
                    let summary = summarize(&cycle, &evaluations);
                    hook.cycle_homologated(&cycle, &summary).await;
                }
                Err(err) => warn!(
                    cycle_id = %cycle.id,
                    error = %err,
                    "skipping reporting hook: could not load evaluations"
                ),
            }
        }
        Ok(cycle)
    }

    /// Soft-delete a cycle no evaluation references.
    #[instrument(skip(self, principal), fields(principal = %principal.id, cycle_id = %cycle_id))]
    pub async fn delete_cycle(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        expected_version: Option<u64>,
    ) -> Result<CycleRecord> {
        let op = Operation::DeleteCycle;
        self.authorize(
            principal,
            op,
            &ScopeContext::global(),
            EntityType::Cycle,
            cycle_id.as_str(),
        )
        .await?;

        let cycle = self.load_active_cycle(cycle_id).await?;
        self.check_version(EntityType::Cycle, cycle.id.as_str(), expected_version, cycle.version)?;

        let evaluations = self
            .store
            .find_evaluations(&EvaluationFilter::for_cycle(&cycle.id))
            .await?;
        if !evaluations.is_empty() {
            return Err(EngineError::invalid(
                "cycle_id",
                format!(
                    "{} evaluation(s) reference cycle {}; it cannot be deleted",
                    evaluations.len(),
                    cycle.id
                ),
            ));
        }

        let mut deleted = cycle.clone();
        deleted.deleted_at = Some(Utc::now());
        deleted.version = cycle.version + 1;

        let mut batch = WriteBatch::new();
        batch.update_cycle(deleted.clone(), cycle.version);
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Cycle,
            cycle.id.as_str(),
            json!({ "state": cycle.state }),
        );
        self.commit(batch).await?;
        Ok(deleted)
    }

    /// Create or update an objective of a (cycle, subject) pair.
    ///
    /// Objectives freeze once the cycle is closed or once any non-voided
    /// evaluation of the subject has been submitted or homologated.
    #[instrument(
        skip(self, principal, input),
        fields(
            principal = %principal.id,
            cycle_id = %input.cycle_id,
            subject_id = %input.subject_id
        )
    )]
    pub async fn record_objective(
        &self,
        principal: &Principal,
        input: ObjectiveInput,
        expected_version: Option<u64>,
    ) -> Result<ObjectiveRecord> {
        let op = if input.id.is_some() {
            Operation::UpdateObjective
        } else {
            Operation::CreateObjective
        };
        let target = input
            .id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{}/{}", input.cycle_id, input.subject_id));

        let previous = match &input.id {
            Some(id) => Some(self.store.get_objective(id).await?),
            None => None,
        };
        let evaluations = self
            .store
            .find_evaluations(
                &EvaluationFilter::for_cycle(&input.cycle_id).with_subject(&input.subject_id),
            )
            .await?;

        // Scope comes from stored data; the caller's claim only seeds a
        // subject the cycle has never seen.
        let stored_unit = self
            .stored_objective_org_unit(&input, previous.as_ref(), &evaluations)
            .await?;
        let org_unit_id = stored_unit.clone().or_else(|| input.org_unit_id.clone());
        let ctx = ScopeContext::from(org_unit_id.clone());
        self.authorize(principal, op, &ctx, EntityType::Objective, &target)
            .await?;
        input.validate()?;
        if let (Some(stored), Some(claimed)) = (&stored_unit, &input.org_unit_id) {
            if stored != claimed {
                return Err(EngineError::invalid(
                    "org_unit_id",
                    format!(
                        "subject {} is evaluated under {stored}, not {claimed}",
                        input.subject_id
                    ),
                ));
            }
        }

        let cycle = self.load_active_cycle(&input.cycle_id).await?;
        if !cycle.state.accepts_work() {
            return Err(EngineError::invalid(
                "cycle_id",
                format!("cycle {} is {}; objectives are frozen", cycle.id, cycle.state),
            ));
        }

        if let Some(locked) = evaluations.iter().find(|ev| {
            matches!(
                ev.state,
                EvaluationState::Submitted | EvaluationState::Homologated
            )
        }) {
            return Err(EngineError::invalid(
                "subject_id",
                format!(
                    "objectives are frozen: evaluation {} is {}",
                    locked.id, locked.state
                ),
            ));
        }

        let completion = input
            .achieved_target
            .map(|achieved| completion_pct(input.planned_target, achieved));
        let now = Utc::now();

        let (record, expected, previous_score) = match previous {
            Some(prev) => {
                self.check_version(
                    EntityType::Objective,
                    prev.id.as_str(),
                    expected_version,
                    prev.version,
                )?;
                if prev.cycle_id != input.cycle_id || prev.subject_id != input.subject_id {
                    return Err(EngineError::invalid(
                        "id",
                        format!("objective {} belongs to another cycle or subject", prev.id),
                    ));
                }
                let record = ObjectiveRecord {
                    id: prev.id.clone(),
                    cycle_id: input.cycle_id.clone(),
                    subject_id: input.subject_id.clone(),
                    org_unit_id: org_unit_id.clone(),
                    kind: input.kind,
                    description: input.description.trim().to_string(),
                    planned_target: input.planned_target,
                    achieved_target: input.achieved_target,
                    completion_pct: completion,
                    score: input.score.map(|s| s.value()),
                    version: prev.version + 1,
                    updated_at: now,
                };
                (record, Some(prev.version), prev.score)
            }
            None => {
                let record = ObjectiveRecord {
                    id: ObjectiveId::new(),
                    cycle_id: input.cycle_id.clone(),
                    subject_id: input.subject_id.clone(),
                    org_unit_id: org_unit_id.clone(),
                    kind: input.kind,
                    description: input.description.trim().to_string(),
                    planned_target: input.planned_target,
                    achieved_target: input.achieved_target,
                    completion_pct: completion,
                    score: input.score.map(|s| s.value()),
                    version: 1,
                    updated_at: now,
                };
                (record, None, None)
            }
        };

        let mut batch = WriteBatch::new();
        batch.put_objective(record.clone(), expected);
        // Draft evaluations of the subject are rewritten at the version read
        // so a concurrent submit cannot freeze a note over these objectives.
        for ev in evaluations
            .into_iter()
            .filter(|ev| ev.state == EvaluationState::Draft)
        {
            let version = ev.version;
            batch.update_evaluation(ev, version);
        }
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Objective,
            record.id.as_str(),
            json!({
                "cycle_id": record.cycle_id,
                "subject_id": record.subject_id,
                "kind": record.kind,
                "score": record.score,
                "previous_score": previous_score,
                "completion_pct": record.completion_pct,
            }),
        );
        self.commit(batch).await?;
        Ok(record)
    }

    /// Cycles ordered by year, semester and id.
    pub async fn list_cycles(
        &self,
        principal: &Principal,
        include_deleted: bool,
    ) -> Result<Vec<CycleRecord>> {
        self.authorize(
            principal,
            Operation::ViewCycles,
            &ScopeContext::global(),
            EntityType::Cycle,
            "*",
        )
        .await?;
        Ok(self.store.list_cycles(include_deleted).await?)
    }

    pub async fn get_cycle(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
    ) -> Result<CycleRecord> {
        self.authorize(
            principal,
            Operation::ViewCycles,
            &ScopeContext::global(),
            EntityType::Cycle,
            cycle_id.as_str(),
        )
        .await?;
        self.load_active_cycle(cycle_id).await
    }

    /// Objectives of a cycle, optionally for one subject. Objectives outside
    /// the caller's view scope are silently filtered.
    pub async fn list_objectives(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        subject_id: Option<&PrincipalId>,
    ) -> Result<Vec<ObjectiveRecord>> {
        let permission = Operation::ViewObjectives.required_permission();
        let rows = self.store.find_objectives(cycle_id, subject_id).await?;
        Ok(rows
            .into_iter()
            .filter(|objective| {
                let ctx = ScopeContext::from(objective.org_unit_id.clone());
                self.matrix
                    .authorize(principal, permission.module, permission.action, &ctx)
                    .is_allowed()
            })
            .collect())
    }

    /// Org unit already on record for the objective's subject: the
    /// objective's own, then a live evaluation's, then a sibling objective's.
    async fn stored_objective_org_unit(
        &self,
        input: &ObjectiveInput,
        previous: Option<&ObjectiveRecord>,
        evaluations: &[EvaluationRecord],
    ) -> Result<Option<OrgUnitId>> {
        if let Some(unit) = previous.and_then(|prev| prev.org_unit_id.clone()) {
            return Ok(Some(unit));
        }
        if let Some(unit) = evaluations
            .iter()
            .filter(|ev| ev.state != EvaluationState::Voided)
            .find_map(|ev| ev.org_unit_id.clone())
        {
            return Ok(Some(unit));
        }
        let siblings = self
            .store
            .find_objectives(&input.cycle_id, Some(&input.subject_id))
            .await?;
        Ok(siblings
            .into_iter()
            .find_map(|objective| objective.org_unit_id))
    }

    /// Read-only aggregate over the cycle's evaluations.
    pub async fn cycle_summary(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
    ) -> Result<CycleSummary> {
        self.authorize(
            principal,
            Operation::ViewReports,
            &ScopeContext::global(),
            EntityType::Cycle,
            cycle_id.as_str(),
        )
        .await?;
        let cycle = self.load_active_cycle(cycle_id).await?;
        let evaluations = self
            .store
            .find_evaluations(&EvaluationFilter::for_cycle(&cycle.id))
            .await?;
        Ok(summarize(&cycle, &evaluations))
    }

    #[instrument(
        skip(self, principal),
        fields(principal = %principal.id, cycle_id = %cycle_id, to = %to)
    )]
    async fn advance_cycle(
        &self,
        principal: &Principal,
        cycle_id: &CycleId,
        op: Operation,
        to: CycleState,
        expected_version: Option<u64>,
    ) -> Result<CycleRecord> {
        self.authorize(
            principal,
            op,
            &ScopeContext::global(),
            EntityType::Cycle,
            cycle_id.as_str(),
        )
        .await?;

        let cycle = self.load_active_cycle(cycle_id).await?;
        self.check_version(EntityType::Cycle, cycle.id.as_str(), expected_version, cycle.version)?;
        ensure_transition(cycle.state, to)?;

        let mut metadata = json!({
            "from": cycle.state,
            "to": to,
        });
        if to == CycleState::Closed {
            let evaluations = self
                .store
                .find_evaluations(&EvaluationFilter::for_cycle(&cycle.id))
                .await?;
            let mut pending: Vec<String> = evaluations
                .iter()
                .filter(|ev| ev.state.is_pending())
                .map(|ev| ev.id.to_string())
                .collect();
            if !pending.is_empty() {
                pending.sort();
                return Err(EngineError::CycleNotReady {
                    cycle_id: cycle.id.to_string(),
                    pending,
                });
            }
            metadata["evaluations"] = json!(evaluations.len());
        }

        let mut updated = cycle.clone();
        updated.state = to;
        updated.version = cycle.version + 1;

        let mut batch = WriteBatch::new();
        batch.update_cycle(updated.clone(), cycle.version);
        AuditRecorder::record(
            &mut batch,
            principal.actor_id(),
            op.audit_action(),
            EntityType::Cycle,
            cycle.id.as_str(),
            metadata,
        );
        self.commit(batch).await?;

        obs::emit_cycle_transitioned(updated.id.as_str(), cycle.state.as_str(), to.as_str());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_lifecycle() {
        use CycleState::*;

        assert!(cycle_transition_allowed(Open, MidCycleReview));
        assert!(cycle_transition_allowed(MidCycleReview, Closed));
        assert!(cycle_transition_allowed(Closed, Homologated));

        assert!(!cycle_transition_allowed(Open, Closed));
        assert!(!cycle_transition_allowed(Closed, Open));
        assert!(!cycle_transition_allowed(Homologated, Closed));
        assert!(!cycle_transition_allowed(MidCycleReview, Open));
    }

    #[test]
    fn test_invalid_transition_names_states() {
        let err = ensure_transition(CycleState::Open, CycleState::Homologated).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                entity: "cycle".to_string(),
                from: "open".to_string(),
                to: "homologated".to_string(),
            }
        );
    }
}
