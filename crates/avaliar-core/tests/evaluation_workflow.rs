//! End-to-end evaluation workflow over the in-memory store.

use std::sync::Arc;

use chrono::NaiveDate;

use avaliar_core::{
    Action, CompetencyScoreInput, Engine, EngineError, Module, NewCycle, NewEvaluation,
    ObjectiveInput, PermissionMatrix, Principal, Score, UserRoleAssignment,
};
use avaliar_state::{
    AuditFilter, AuditOutcome, Classification, CompetencyId, CompetencyKind, CycleId, CycleKind,
    CycleRecord, EntityType, EvaluationKind, EvaluationRecord, EvaluationState, EvaluationStore,
    MemoryEvaluationStore, ObjectiveKind, PrincipalId,
};

fn admin() -> Principal {
    Principal::new("admin").with_assignment(UserRoleAssignment::global("administrator"))
}

fn rater() -> Principal {
    Principal::new("rui").with_assignment(UserRoleAssignment::global("evaluator"))
}

fn council() -> Principal {
    Principal::new("carla").with_assignment(UserRoleAssignment::global("homologation_council"))
}

fn make_engine() -> Engine<MemoryEvaluationStore> {
    Engine::new(
        Arc::new(MemoryEvaluationStore::new()),
        Arc::new(PermissionMatrix::institutional_default()),
    )
}

fn score(v: f64) -> Score {
    Score::new(v).unwrap()
}

async fn open_cycle(engine: &Engine<MemoryEvaluationStore>) -> CycleRecord {
    engine
        .create_cycle(
            &admin(),
            NewCycle {
                id: Some(CycleId::from("c-2025")),
                year: 2025,
                semester: 1,
                kind: CycleKind::Annual,
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            },
        )
        .await
        .unwrap()
}

async fn draft(engine: &Engine<MemoryEvaluationStore>, cycle: &CycleRecord) -> EvaluationRecord {
    engine
        .create_evaluation(
            &rater(),
            NewEvaluation {
                cycle_id: cycle.id.clone(),
                subject_id: PrincipalId::from("ana"),
                rater_id: PrincipalId::from("rui"),
                kind: EvaluationKind::Superior,
                org_unit_id: None,
            },
        )
        .await
        .unwrap()
}

async fn add_objective(
    engine: &Engine<MemoryEvaluationStore>,
    cycle: &CycleRecord,
    kind: ObjectiveKind,
    value: f64,
) {
    engine
        .record_objective(
            &rater(),
            ObjectiveInput {
                id: None,
                cycle_id: cycle.id.clone(),
                subject_id: PrincipalId::from("ana"),
                org_unit_id: None,
                kind,
                description: format!("{kind:?} objective"),
                planned_target: 10.0,
                achieved_target: Some(8.0),
                score: Some(score(value)),
            },
            None,
        )
        .await
        .unwrap();
}

async fn add_competency(
    engine: &Engine<MemoryEvaluationStore>,
    evaluation: &EvaluationRecord,
    competency: &str,
    kind: CompetencyKind,
    value: f64,
) {
    engine
        .record_competency_score(
            &rater(),
            &evaluation.id,
            CompetencyScoreInput {
                competency_id: CompetencyId::from(competency),
                kind,
                score: score(value),
            },
            None,
        )
        .await
        .unwrap();
}

/// Cycle plus a draft whose category averages are 4.0 / 4.5 / 5.0 / 4.0.
async fn ready_to_submit() -> (Engine<MemoryEvaluationStore>, EvaluationRecord) {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let evaluation = draft(&engine, &cycle).await;

    add_objective(&engine, &cycle, ObjectiveKind::Individual, 4.0).await;
    add_objective(&engine, &cycle, ObjectiveKind::Team, 4.0).await;
    add_objective(&engine, &cycle, ObjectiveKind::Team, 5.0).await;
    add_competency(&engine, &evaluation, "communication", CompetencyKind::Transversal, 5.0).await;
    add_competency(&engine, &evaluation, "tooling", CompetencyKind::Technical, 3.5).await;
    add_competency(&engine, &evaluation, "testing", CompetencyKind::Technical, 4.5).await;

    let evaluation = engine.store().get_evaluation(&evaluation.id).await.unwrap();
    (engine, evaluation)
}

#[tokio::test]
async fn test_submit_freezes_note() {
    let (engine, evaluation) = ready_to_submit().await;

    let submitted = engine
        .submit(&rater(), &evaluation.id, Some(evaluation.version))
        .await
        .unwrap();

    assert_eq!(submitted.state, EvaluationState::Submitted);
    assert_eq!(submitted.final_note, Some(4.3));
    assert_eq!(submitted.classification, Some(Classification::Bom));
    assert!(submitted.submitted_at.is_some());
    assert_eq!(submitted.version, evaluation.version + 1);

    let averages = submitted.category_averages.unwrap();
    assert_eq!(averages.individual, 4.0);
    assert_eq!(averages.team, 4.5);
    assert_eq!(averages.transversal, 5.0);
    assert_eq!(averages.technical, 4.0);

    let stored = engine.store().get_evaluation(&evaluation.id).await.unwrap();
    assert_eq!(stored, submitted);

    let audit = engine
        .store()
        .list_audit_entries(&AuditFilter::for_entity(
            EntityType::Evaluation,
            evaluation.id.as_str(),
        ))
        .await
        .unwrap();
    let entry = audit
        .iter()
        .find(|e| e.action == "evaluation.submit")
        .expect("submit audited");
    assert_eq!(entry.outcome, AuditOutcome::Success);
    assert_eq!(entry.actor_id, Some(PrincipalId::from("rui")));
    assert_eq!(entry.metadata["final_note"], 4.3);
    assert_eq!(entry.metadata["from"], "draft");
    assert_eq!(entry.metadata["to"], "submitted");
}

#[tokio::test]
async fn test_homologate_without_permission_is_denied_and_audited() {
    let (engine, evaluation) = ready_to_submit().await;
    let submitted = engine.submit(&rater(), &evaluation.id, None).await.unwrap();

    let err = engine
        .homologate(&rater(), &submitted.id, Some(submitted.version))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PermissionDenied {
            module: Module::Homologation,
            action: Action::Update,
            ..
        }
    ));

    let stored = engine.store().get_evaluation(&submitted.id).await.unwrap();
    assert_eq!(stored.state, EvaluationState::Submitted);
    assert_eq!(stored.version, submitted.version);

    let denied = engine
        .store()
        .list_audit_entries(
            &AuditFilter::for_entity(EntityType::Evaluation, submitted.id.as_str())
                .with_outcome(AuditOutcome::Denied),
        )
        .await
        .unwrap();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, "evaluation.homologate");
    assert_eq!(denied[0].metadata["principal_id"], "rui");
}

#[tokio::test]
async fn test_homologation_requires_submitted() {
    let (engine, evaluation) = ready_to_submit().await;

    let err = engine
        .homologate(&council(), &evaluation.id, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            entity: "evaluation".to_string(),
            from: "draft".to_string(),
            to: "homologated".to_string(),
        }
    );

    let submitted = engine.submit(&rater(), &evaluation.id, None).await.unwrap();
    let homologated = engine
        .homologate(&council(), &submitted.id, Some(submitted.version))
        .await
        .unwrap();
    assert_eq!(homologated.state, EvaluationState::Homologated);
    assert_eq!(homologated.final_note, submitted.final_note);
    assert!(homologated.homologated_at.is_some());
}

#[tokio::test]
async fn test_homologated_evaluation_is_immutable() {
    let (engine, evaluation) = ready_to_submit().await;
    engine.submit(&rater(), &evaluation.id, None).await.unwrap();
    let homologated = engine
        .homologate(&council(), &evaluation.id, None)
        .await
        .unwrap();

    assert!(matches!(
        engine.void(&admin(), &homologated.id, "mistake", None).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine
            .return_for_correction(&council(), &homologated.id, Some("late"), None)
            .await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.submit(&rater(), &homologated.id, None).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    let err = engine
        .record_competency_score(
            &rater(),
            &homologated.id,
            CompetencyScoreInput {
                competency_id: CompetencyId::from("tooling"),
                kind: CompetencyKind::Technical,
                score: score(1.0),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed { .. }));

    let stored = engine.store().get_evaluation(&homologated.id).await.unwrap();
    assert_eq!(stored, homologated);
}

#[tokio::test]
async fn test_duplicate_evaluation_rejected() {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let first = draft(&engine, &cycle).await;

    let err = engine
        .create_evaluation(
            &rater(),
            NewEvaluation {
                cycle_id: cycle.id.clone(),
                subject_id: first.subject_id.clone(),
                rater_id: first.rater_id.clone(),
                kind: first.kind,
                org_unit_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEvaluation { .. }));

    // A different kind for the same pair is a separate evaluation.
    engine
        .create_evaluation(
            &rater(),
            NewEvaluation {
                cycle_id: cycle.id.clone(),
                subject_id: first.subject_id.clone(),
                rater_id: first.rater_id.clone(),
                kind: EvaluationKind::Peer,
                org_unit_id: None,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_submit_with_missing_category_fails() {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let evaluation = draft(&engine, &cycle).await;
    add_objective(&engine, &cycle, ObjectiveKind::Individual, 4.0).await;
    add_objective(&engine, &cycle, ObjectiveKind::Team, 4.0).await;
    add_competency(&engine, &evaluation, "communication", CompetencyKind::Transversal, 5.0).await;

    let err = engine
        .submit(&rater(), &evaluation.id, None)
        .await
        .unwrap_err();
    match err {
        EngineError::ValidationFailed { fields } => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].field, "technical_competencies");
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }

    let stored = engine.store().get_evaluation(&evaluation.id).await.unwrap();
    assert_eq!(stored.state, EvaluationState::Draft);
    assert!(stored.final_note.is_none());
}

#[tokio::test]
async fn test_unscored_objective_blocks_submit() {
    let (engine, evaluation) = ready_to_submit().await;
    engine
        .record_objective(
            &rater(),
            ObjectiveInput {
                id: None,
                cycle_id: evaluation.cycle_id.clone(),
                subject_id: evaluation.subject_id.clone(),
                org_unit_id: None,
                kind: ObjectiveKind::Individual,
                description: "Pending".to_string(),
                planned_target: 5.0,
                achieved_target: None,
                score: None,
            },
            None,
        )
        .await
        .unwrap();

    let err = engine
        .submit(&rater(), &evaluation.id, None)
        .await
        .unwrap_err();
    match err {
        EngineError::ValidationFailed { fields } => {
            assert!(fields[0].field.starts_with("objective:"));
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_only_rater_or_system_may_submit() {
    let (engine, evaluation) = ready_to_submit().await;
    let other_rater =
        Principal::new("rita").with_assignment(UserRoleAssignment::global("evaluator"));

    let err = engine
        .submit(&other_rater, &evaluation.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied { .. }));

    let system = Principal::system("scheduler");
    let submitted = engine.submit(&system, &evaluation.id, None).await.unwrap();
    assert_eq!(submitted.state, EvaluationState::Submitted);

    let audit = engine
        .store()
        .list_audit_entries(&AuditFilter::for_entity(
            EntityType::Evaluation,
            evaluation.id.as_str(),
        ))
        .await
        .unwrap();
    let submit = audit
        .iter()
        .find(|e| e.action == "evaluation.submit" && e.outcome == AuditOutcome::Success)
        .unwrap();
    assert_eq!(submit.actor_id, None);
}

#[tokio::test]
async fn test_return_for_correction_clears_frozen_fields() {
    let (engine, evaluation) = ready_to_submit().await;
    let submitted = engine.submit(&rater(), &evaluation.id, None).await.unwrap();

    let returned = engine
        .return_for_correction(&council(), &submitted.id, Some("technical score typo"), None)
        .await
        .unwrap();
    assert_eq!(returned.state, EvaluationState::Draft);
    assert!(returned.final_note.is_none());
    assert!(returned.classification.is_none());
    assert!(returned.category_averages.is_none());
    assert!(returned.submitted_at.is_none());

    // Back in draft, scores can change again and the note is recomputed.
    add_competency(&engine, &returned, "tooling", CompetencyKind::Technical, 5.0).await;
    let resubmitted = engine.submit(&rater(), &returned.id, None).await.unwrap();
    assert_eq!(resubmitted.final_note, Some(4.45));
}

#[tokio::test]
async fn test_void_requires_permission_and_reason() {
    let (engine, evaluation) = ready_to_submit().await;

    // Evaluators cannot delete.
    let err = engine
        .void(&rater(), &evaluation.id, "duplicate entry", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PermissionDenied {
            action: Action::Delete,
            ..
        }
    ));

    let err = engine
        .void(&admin(), &evaluation.id, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed { .. }));

    let voided = engine
        .void(&admin(), &evaluation.id, "duplicate entry", None)
        .await
        .unwrap();
    assert_eq!(voided.state, EvaluationState::Voided);
    assert!(voided.voided_at.is_some());

    let audit = engine
        .store()
        .list_audit_entries(
            &AuditFilter::for_entity(EntityType::Evaluation, evaluation.id.as_str())
                .with_outcome(AuditOutcome::Success),
        )
        .await
        .unwrap();
    let last = audit.last().unwrap();
    assert_eq!(last.action, "evaluation.void");
    assert_eq!(last.metadata["reason"], "duplicate entry");
}

#[tokio::test]
async fn test_midpoint_review_needs_mid_cycle_review() {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let midpoint = NewEvaluation {
        cycle_id: cycle.id.clone(),
        subject_id: PrincipalId::from("ana"),
        rater_id: PrincipalId::from("rui"),
        kind: EvaluationKind::MidpointReview,
        org_unit_id: None,
    };

    let err = engine
        .create_evaluation(&rater(), midpoint.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed { .. }));

    engine
        .start_mid_cycle_review(&admin(), &cycle.id, None)
        .await
        .unwrap();
    let created = engine.create_evaluation(&rater(), midpoint).await.unwrap();
    assert_eq!(created.state, EvaluationState::Draft);
}

#[tokio::test]
async fn test_failed_commit_persists_nothing() {
    let (engine, evaluation) = ready_to_submit().await;
    let audit_before = engine.store().audit_len();

    engine.store().fail_next_commit();
    let err = engine
        .submit(&rater(), &evaluation.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));

    let stored = engine.store().get_evaluation(&evaluation.id).await.unwrap();
    assert_eq!(stored, evaluation);
    assert_eq!(engine.store().audit_len(), audit_before);
}

#[tokio::test]
async fn test_scoped_evaluator_limited_to_org_unit() {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let scoped =
        Principal::new("rui").with_assignment(UserRoleAssignment::org_unit("evaluator", "finance"));

    let mut request = NewEvaluation {
        cycle_id: cycle.id.clone(),
        subject_id: PrincipalId::from("ana"),
        rater_id: PrincipalId::from("rui"),
        kind: EvaluationKind::Superior,
        org_unit_id: Some("finance".into()),
    };
    engine
        .create_evaluation(&scoped, request.clone())
        .await
        .unwrap();

    request.subject_id = PrincipalId::from("bruno");
    request.org_unit_id = Some("legal".into());
    let err = engine
        .create_evaluation(&scoped, request)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied { .. }));
}

fn objective_for(cycle: &CycleRecord, subject: &str, org_unit: Option<&str>) -> ObjectiveInput {
    ObjectiveInput {
        id: None,
        cycle_id: cycle.id.clone(),
        subject_id: PrincipalId::from(subject),
        org_unit_id: org_unit.map(Into::into),
        kind: ObjectiveKind::Individual,
        description: "Close audit findings".to_string(),
        planned_target: 4.0,
        achieved_target: Some(3.0),
        score: None,
    }
}

#[tokio::test]
async fn test_objective_scope_follows_subject_org_unit() {
    let engine = make_engine();
    let cycle = open_cycle(&engine).await;
    let outsider =
        Principal::new("dora").with_assignment(UserRoleAssignment::org_unit("evaluator", "dsi"));

    engine
        .create_evaluation(
            &rater(),
            NewEvaluation {
                cycle_id: cycle.id.clone(),
                subject_id: PrincipalId::from("ana"),
                rater_id: PrincipalId::from("rui"),
                kind: EvaluationKind::Superior,
                org_unit_id: Some("rh".into()),
            },
        )
        .await
        .unwrap();

    // Claiming the caller's own unit does not reach a subject evaluated in `rh`.
    for claim in [Some("dsi"), None] {
        let err = engine
            .record_objective(&outsider, objective_for(&cycle, "ana", claim), None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, EngineError::PermissionDenied { .. }),
            "claim {claim:?}: {err:?}"
        );
    }

    let recorded = engine
        .record_objective(&rater(), objective_for(&cycle, "ana", None), None)
        .await
        .unwrap();
    assert_eq!(recorded.org_unit_id, Some("rh".into()));

    let mut update = objective_for(&cycle, "ana", Some("dsi"));
    update.id = Some(recorded.id.clone());
    let err = engine
        .record_objective(&outsider, update.clone(), Some(recorded.version))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied { .. }));

    // An authorized caller still cannot move the objective to another unit.
    let err = engine
        .record_objective(&rater(), update, Some(recorded.version))
        .await
        .unwrap_err();
    match err {
        EngineError::ValidationFailed { fields } => assert_eq!(fields[0].field, "org_unit_id"),
        other => panic!("expected ValidationFailed, got {other:?}"),
    }

    // A subject the cycle has not seen takes the claimed unit.
    let own = engine
        .record_objective(&outsider, objective_for(&cycle, "bruno", Some("dsi")), None)
        .await
        .unwrap();
    assert_eq!(own.org_unit_id, Some("dsi".into()));

    let visible = engine
        .list_objectives(&outsider, &cycle.id, None)
        .await
        .unwrap();
    assert_eq!(visible, vec![own]);
    assert!(engine
        .list_objectives(&outsider, &cycle.id, Some(&PrincipalId::from("ana")))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        engine
            .list_objectives(&rater(), &cycle.id, None)
            .await
            .unwrap()
            .len(),
        2
    );

    let stored = engine.store().get_objective(&recorded.id).await.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.org_unit_id, Some("rh".into()));
}
