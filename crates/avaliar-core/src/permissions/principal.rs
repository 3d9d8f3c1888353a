//! Authenticated principals, their role assignments and scope contexts.

use serde::{Deserialize, Serialize};

use avaliar_state::{OrgUnitId, PrincipalId, RoleId};

/// Role id the built-in matrix reserves for system-initiated actions.
pub const SYSTEM_ROLE: &str = "system";

/// Reach of a role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    OrgUnit(OrgUnitId),
}

/// Binds a principal to a role within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub role_id: RoleId,
    pub scope: Scope,
}

impl UserRoleAssignment {
    pub fn global(role_id: impl Into<RoleId>) -> Self {
        Self {
            role_id: role_id.into(),
            scope: Scope::Global,
        }
    }

    pub fn org_unit(role_id: impl Into<RoleId>, org_unit_id: impl Into<OrgUnitId>) -> Self {
        Self {
            role_id: role_id.into(),
            scope: Scope::OrgUnit(org_unit_id.into()),
        }
    }
}

/// Already-authenticated caller of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    /// System principals act without a human actor; their audit entries carry
    /// no actor id.
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub assignments: Vec<UserRoleAssignment>,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            system: false,
            assignments: Vec::new(),
        }
    }

    /// System principal holding the global `system` role.
    pub fn system(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            system: true,
            assignments: vec![UserRoleAssignment::global(SYSTEM_ROLE)],
        }
    }

    pub fn with_assignment(mut self, assignment: UserRoleAssignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    /// Actor recorded in audit entries.
    pub fn actor_id(&self) -> Option<&PrincipalId> {
        if self.system {
            None
        } else {
            Some(&self.id)
        }
    }
}

/// Where the target of an operation lives.
///
/// An empty context (no org unit) is satisfied by global assignments only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeContext {
    pub org_unit_id: Option<OrgUnitId>,
}

impl ScopeContext {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn org_unit(id: impl Into<OrgUnitId>) -> Self {
        Self {
            org_unit_id: Some(id.into()),
        }
    }
}

impl From<Option<OrgUnitId>> for ScopeContext {
    fn from(org_unit_id: Option<OrgUnitId>) -> Self {
        Self { org_unit_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_principal_has_no_actor() {
        let p = Principal::system("scheduler");
        assert!(p.actor_id().is_none());
        assert_eq!(p.assignments[0].role_id.as_str(), SYSTEM_ROLE);
    }

    #[test]
    fn test_principal_json_shape() {
        let json = r#"{
            "id": "rui",
            "assignments": [
                {"role_id": "evaluator", "scope": {"org_unit": "dsi"}},
                {"role_id": "employee", "scope": "global"}
            ]
        }"#;
        let p: Principal = serde_json::from_str(json).unwrap();
        assert!(!p.system);
        assert_eq!(p.assignments[0], UserRoleAssignment::org_unit("evaluator", "dsi"));
        assert_eq!(p.assignments[1].scope, Scope::Global);
        assert_eq!(p.actor_id().map(|a| a.as_str()), Some("rui"));
    }
}
