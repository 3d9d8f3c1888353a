//! Avaliar Core Library
//!
//! Scoring, workflow and authorization engine for staff evaluation cycles.
//! Persistence lives behind [`avaliar_state::EvaluationStore`].

pub mod audit;
pub mod config;
pub mod cycle_lifecycle;
pub mod domain;
pub mod engine;
pub mod evaluation_workflow;
pub mod metrics;
pub mod obs;
pub mod permissions;
pub mod reporting;
pub mod scoring;
pub mod telemetry;

pub use audit::{
    verify_audit_export, write_audit_export, AuditExportReceipt, AuditRecorder,
};
pub use config::{ConfigError, EngineConfig, MatrixSource, AUDIT_DENIALS_ENV, CONFIG_ENV};
pub use cycle_lifecycle::cycle_transition_allowed;
pub use domain::{
    CompetencyScoreInput, EngineError, FieldIssue, NewCycle, NewEvaluation, ObjectiveInput,
    Result, Score,
};
pub use engine::Engine;
pub use evaluation_workflow::evaluation_transition_allowed;
pub use permissions::{
    Action, AuthzDecision, MatrixDocument, Module, Operation, Permission, PermissionMatrix,
    Principal, RoleDefinition, Scope, ScopeContext, UserRoleAssignment, SYSTEM_ROLE,
};
pub use reporting::{summarize, CycleReportingHook, CycleSummary, TracingReportingHook};
pub use scoring::{
    completion_pct, compute_category_average, round_half_up, weighted_note, Category,
    CategoryAverage, ClassificationThresholds, NafWeights, ScoreAggregator, ScoreBreakdown,
    ScoringPolicy,
};

pub use metrics::METRICS;
pub use obs::{
    emit_cycle_transitioned, emit_evaluation_created, emit_evaluation_transitioned,
    emit_note_frozen, emit_permission_denied, emit_store_conflict, OperationSpan,
};
pub use telemetry::init_tracing;

/// Avaliar version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
