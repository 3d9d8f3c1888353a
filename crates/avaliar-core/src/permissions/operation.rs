//! Engine operations and the permission each one requires.

use avaliar_state::EvaluationKind;

use super::module::{Action, Module, Permission};

/// A mutating (or audited read) engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateEvaluation(EvaluationKind),
    RecordCompetencyScore(EvaluationKind),
    SubmitEvaluation(EvaluationKind),
    HomologateEvaluation,
    ReturnForCorrection,
    VoidEvaluation(EvaluationKind),
    ViewEvaluation(EvaluationKind),
    CreateObjective,
    UpdateObjective,
    ViewObjectives,
    CreateCycle,
    StartMidCycleReview,
    CloseCycle,
    HomologateCycle,
    DeleteCycle,
    ViewCycles,
    ViewReports,
    ViewAudit,
}

impl Operation {
    /// The single `(module, action)` table every authorization goes through.
    pub fn required_permission(self) -> Permission {
        use Operation::*;

        let (module, action) = match self {
            CreateEvaluation(kind) => (Module::for_evaluation_kind(kind), Action::Create),
            RecordCompetencyScore(kind) | SubmitEvaluation(kind) => {
                (Module::for_evaluation_kind(kind), Action::Update)
            }
            HomologateEvaluation | ReturnForCorrection => (Module::Homologation, Action::Update),
            VoidEvaluation(kind) => (Module::for_evaluation_kind(kind), Action::Delete),
            ViewEvaluation(kind) => (Module::for_evaluation_kind(kind), Action::View),
            CreateObjective => (Module::Objectives, Action::Create),
            UpdateObjective => (Module::Objectives, Action::Update),
            ViewObjectives => (Module::Objectives, Action::View),
            CreateCycle => (Module::Cycles, Action::Create),
            StartMidCycleReview | CloseCycle => (Module::Cycles, Action::Update),
            HomologateCycle => (Module::CycleHomologation, Action::Update),
            DeleteCycle => (Module::Cycles, Action::Delete),
            ViewCycles => (Module::Cycles, Action::View),
            ViewReports => (Module::Reports, Action::View),
            ViewAudit => (Module::AuditLog, Action::View),
        };
        Permission::new(module, action)
    }

    /// Action name written to the audit log.
    pub fn audit_action(self) -> &'static str {
        use Operation::*;

        match self {
            CreateEvaluation(_) => "evaluation.create",
            RecordCompetencyScore(_) => "evaluation.score",
            SubmitEvaluation(_) => "evaluation.submit",
            HomologateEvaluation => "evaluation.homologate",
            ReturnForCorrection => "evaluation.return",
            VoidEvaluation(_) => "evaluation.void",
            ViewEvaluation(_) => "evaluation.view",
            CreateObjective => "objective.create",
            UpdateObjective => "objective.update",
            ViewObjectives => "objective.view",
            CreateCycle => "cycle.create",
            StartMidCycleReview => "cycle.start_mid_cycle_review",
            CloseCycle => "cycle.close",
            HomologateCycle => "cycle.homologate",
            DeleteCycle => "cycle.delete",
            ViewCycles => "cycle.view",
            ViewReports => "report.view",
            ViewAudit => "audit.view",
        }
    }
}
