//! Modules, actions and the permission pair.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use avaliar_state::EvaluationKind;

/// Functional area of the system a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Dashboard,
    Cycles,
    CycleHomologation,
    OrgUnits,
    Employees,
    Objectives,
    Competencies,
    SuperiorEvaluation,
    PeerEvaluation,
    InternalUserEvaluation,
    ExternalUserEvaluation,
    MidpointReview,
    Homologation,
    Reports,
    Users,
    Roles,
    AuditLog,
    Settings,
}

impl Module {
    pub const ALL: [Module; 18] = [
        Self::Dashboard,
        Self::Cycles,
        Self::CycleHomologation,
        Self::OrgUnits,
        Self::Employees,
        Self::Objectives,
        Self::Competencies,
        Self::SuperiorEvaluation,
        Self::PeerEvaluation,
        Self::InternalUserEvaluation,
        Self::ExternalUserEvaluation,
        Self::MidpointReview,
        Self::Homologation,
        Self::Reports,
        Self::Users,
        Self::Roles,
        Self::AuditLog,
        Self::Settings,
    ];

    /// Evaluation modules, one per evaluation kind.
    pub const EVALUATIONS: [Module; 5] = [
        Self::SuperiorEvaluation,
        Self::PeerEvaluation,
        Self::InternalUserEvaluation,
        Self::ExternalUserEvaluation,
        Self::MidpointReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Cycles => "cycles",
            Self::CycleHomologation => "cycle_homologation",
            Self::OrgUnits => "org_units",
            Self::Employees => "employees",
            Self::Objectives => "objectives",
            Self::Competencies => "competencies",
            Self::SuperiorEvaluation => "superior_evaluation",
            Self::PeerEvaluation => "peer_evaluation",
            Self::InternalUserEvaluation => "internal_user_evaluation",
            Self::ExternalUserEvaluation => "external_user_evaluation",
            Self::MidpointReview => "midpoint_review",
            Self::Homologation => "homologation",
            Self::Reports => "reports",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::AuditLog => "audit_log",
            Self::Settings => "settings",
        }
    }

    /// Module governing evaluations of the given kind.
    pub fn for_evaluation_kind(kind: EvaluationKind) -> Self {
        match kind {
            EvaluationKind::Superior => Self::SuperiorEvaluation,
            EvaluationKind::Peer => Self::PeerEvaluation,
            EvaluationKind::InternalUser => Self::InternalUserEvaluation,
            EvaluationKind::ExternalUser => Self::ExternalUserEvaluation,
            EvaluationKind::MidpointReview => Self::MidpointReview,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown module: {s}"))
    }
}

/// Operation class within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Self::View, Self::Create, Self::Update, Self::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action: {s}"))
    }
}

/// A `(module, action)` grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub module: Module,
    pub action: Action,
}

impl Permission {
    pub const fn new(module: Module, action: Action) -> Self {
        Self { module, action }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.action)
    }
}
