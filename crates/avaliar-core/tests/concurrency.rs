//! Optimistic concurrency: stale versions lose, uniqueness holds under
//! concurrent creation.

use std::sync::Arc;

use chrono::NaiveDate;

use avaliar_core::{
    CompetencyScoreInput, Engine, EngineError, NewCycle, NewEvaluation, ObjectiveInput,
    PermissionMatrix, Principal, Score, UserRoleAssignment,
};
use avaliar_state::{
    AuditFilter, CompetencyId, CompetencyKind, CycleId, CycleKind, EntityType, EvaluationFilter,
    EvaluationKind, EvaluationRecord, EvaluationState, EvaluationStore, MemoryEvaluationStore,
    ObjectiveKind, PrincipalId,
};

fn admin() -> Principal {
    Principal::new("admin").with_assignment(UserRoleAssignment::global("administrator"))
}

fn rater() -> Principal {
    Principal::new("rui").with_assignment(UserRoleAssignment::global("evaluator"))
}

fn make_engine() -> Engine<MemoryEvaluationStore> {
    Engine::new(
        Arc::new(MemoryEvaluationStore::new()),
        Arc::new(PermissionMatrix::institutional_default()),
    )
}

async fn setup(engine: &Engine<MemoryEvaluationStore>) -> EvaluationRecord {
    let cycle = engine
        .create_cycle(
            &admin(),
            NewCycle {
                id: Some(CycleId::from("c-2025")),
                year: 2025,
                semester: 2,
                kind: CycleKind::Semiannual,
                start_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            },
        )
        .await
        .unwrap();
    let evaluation = engine
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
        .unwrap();

    for kind in [ObjectiveKind::Individual, ObjectiveKind::Team] {
        engine
            .record_objective(
                &rater(),
                ObjectiveInput {
                    id: None,
                    cycle_id: cycle.id.clone(),
                    subject_id: PrincipalId::from("ana"),
                    org_unit_id: None,
                    kind,
                    description: "Quarterly delivery".to_string(),
                    planned_target: 4.0,
                    achieved_target: Some(4.0),
                    score: Some(Score::new(4.0).unwrap()),
                },
                None,
            )
            .await
            .unwrap();
    }
    for (competency, kind) in [
        ("teamwork", CompetencyKind::Transversal),
        ("rust", CompetencyKind::Technical),
    ] {
        engine
            .record_competency_score(
                &rater(),
                &evaluation.id,
                CompetencyScoreInput {
                    competency_id: CompetencyId::from(competency),
                    kind,
                    score: Score::new(4.0).unwrap(),
                },
                None,
            )
            .await
            .unwrap();
    }
    engine.store().get_evaluation(&evaluation.id).await.unwrap()
}

#[tokio::test]
async fn test_second_submit_on_stale_version_conflicts() {
    let engine = make_engine();
    let evaluation = setup(&engine).await;
    let read_version = evaluation.version;

    let first = engine
        .submit(&rater(), &evaluation.id, Some(read_version))
        .await
        .unwrap();
    assert_eq!(first.version, read_version + 1);

    let second = engine
        .submit(&rater(), &evaluation.id, Some(read_version))
        .await
        .unwrap_err();
    assert_eq!(
        second,
        EngineError::ConcurrentModification {
            entity_type: "evaluation".to_string(),
            id: evaluation.id.to_string(),
        }
    );

    let stored = engine.store().get_evaluation(&evaluation.id).await.unwrap();
    assert_eq!(stored, first);
    let submits = engine
        .store()
        .list_audit_entries(&AuditFilter::for_entity(
            EntityType::Evaluation,
            evaluation.id.as_str(),
        ))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == "evaluation.submit")
        .count();
    assert_eq!(submits, 1);
}

#[tokio::test]
async fn test_score_write_invalidates_read_version() {
    let engine = make_engine();
    let evaluation = setup(&engine).await;

    engine
        .record_competency_score(
            &rater(),
            &evaluation.id,
            CompetencyScoreInput {
                competency_id: CompetencyId::from("rust"),
                kind: CompetencyKind::Technical,
                score: Score::new(2.0).unwrap(),
            },
            Some(evaluation.version),
        )
        .await
        .unwrap();

    // A submit prepared against the pre-score state must not freeze a note.
    let err = engine
        .submit(&rater(), &evaluation.id, Some(evaluation.version))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_keeps_key_unique() {
    let engine = Arc::new(make_engine());
    let evaluation = setup(&engine).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        let cycle_id = evaluation.cycle_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_evaluation(
                    &rater(),
                    NewEvaluation {
                        cycle_id,
                        subject_id: PrincipalId::from("bruno"),
                        rater_id: PrincipalId::from("rui"),
                        kind: EvaluationKind::Peer,
                        org_unit_id: None,
                    },
                )
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::DuplicateEvaluation { .. })
            | Err(EngineError::ConcurrentModification { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);

    let rows = engine
        .store()
        .find_evaluations(
            &EvaluationFilter::for_cycle(&evaluation.cycle_id)
                .with_subject(&PrincipalId::from("bruno")),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), created);
}

#[tokio::test]
async fn test_close_after_creation_sees_new_draft() {
    let engine = make_engine();
    let evaluation = setup(&engine).await;
    let cycle = engine.store().get_cycle(&evaluation.cycle_id).await.unwrap();
    let cycle = engine
        .start_mid_cycle_review(&admin(), &cycle.id, Some(cycle.version))
        .await
        .unwrap();

    engine
        .submit(&rater(), &evaluation.id, None)
        .await
        .unwrap();
    engine
        .homologate(&admin(), &evaluation.id, None)
        .await
        .unwrap();

    // A draft created after the close was prepared bumps the cycle version,
    // so the close built on the old read is rejected.
    let midpoint = engine
        .create_evaluation(
            &rater(),
            NewEvaluation {
                cycle_id: cycle.id.clone(),
                subject_id: PrincipalId::from("ana"),
                rater_id: PrincipalId::from("rui"),
                kind: EvaluationKind::MidpointReview,
                org_unit_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(midpoint.state, EvaluationState::Draft);

    let err = engine
        .close_cycle(&admin(), &cycle.id, Some(cycle.version))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConcurrentModification { .. }));
}
