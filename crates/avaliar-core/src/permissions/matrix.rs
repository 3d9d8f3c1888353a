//! Role-based permission matrix with org-unit scoping.
//!
//! The matrix is plain data: roles with their `(module, action)` grants, an
//! optional child → parent org-unit map, and the `hierarchical_scoping` flag.
//! It is loaded once (TOML or JSON, or the built-in institutional set) and
//! shared by reference; [`PermissionMatrix::authorize`] is pure.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use avaliar_state::{OrgUnitId, RoleId};

use super::module::{Action, Module, Permission};
use super::principal::{Principal, Scope, ScopeContext, SYSTEM_ROLE};
use crate::config::ConfigError;

/// A role and the grants it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: RoleId,
    #[serde(default)]
    pub description: String,
    /// Actions granted per module.
    #[serde(default)]
    pub grants: BTreeMap<Module, BTreeSet<Action>>,
}

impl RoleDefinition {
    pub fn grants(&self, module: Module, action: Action) -> bool {
        self.grants
            .get(&module)
            .is_some_and(|actions| actions.contains(&action))
    }

    pub fn permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.grants.iter().flat_map(|(module, actions)| {
            actions
                .iter()
                .map(move |action| Permission::new(*module, *action))
        })
    }
}

/// Serialized form of a [`PermissionMatrix`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDocument {
    pub roles: Vec<RoleDefinition>,
    /// Child org unit → parent org unit.
    #[serde(default)]
    pub org_units: BTreeMap<OrgUnitId, OrgUnitId>,
    /// When set, an `OrgUnit(u)` assignment also covers descendants of `u`.
    #[serde(default)]
    pub hierarchical_scoping: bool,
}

/// Authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthzDecision {
    Allowed,
    Denied { reason: String },
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Validated permission matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    roles: BTreeMap<RoleId, RoleDefinition>,
    parents: BTreeMap<OrgUnitId, OrgUnitId>,
    hierarchical_scoping: bool,
}

impl PermissionMatrix {
    /// Build a matrix, rejecting duplicate or blank role ids and cyclic
    /// org-unit hierarchies.
    pub fn from_document(doc: MatrixDocument) -> Result<Self, ConfigError> {
        let mut roles = BTreeMap::new();
        for role in doc.roles {
            if role.id.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid("role id must not be blank".to_string()));
            }
            if roles.contains_key(&role.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate role id: {}",
                    role.id
                )));
            }
            roles.insert(role.id.clone(), role);
        }

        check_acyclic(&doc.org_units)?;

        Ok(Self {
            roles,
            parents: doc.org_units,
            hierarchical_scoping: doc.hierarchical_scoping,
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_document(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_document(serde_json::from_str(s)?)
    }

    /// Load from a file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        }
    }

    pub fn to_document(&self) -> MatrixDocument {
        MatrixDocument {
            roles: self.roles.values().cloned().collect(),
            org_units: self.parents.clone(),
            hierarchical_scoping: self.hierarchical_scoping,
        }
    }

    /// Built-in institutional role set.
    pub fn institutional_default() -> Self {
        use Action::{Create, Delete, Update, View};

        let view_all: Vec<(Module, Vec<Action>)> =
            Module::ALL.iter().map(|m| (*m, vec![View])).collect();
        let evaluations =
            |actions: &[Action]| -> Vec<(Module, Vec<Action>)> {
                Module::EVALUATIONS
                    .iter()
                    .map(|m| (*m, actions.to_vec()))
                    .collect()
            };

        let administrator = role(
            "administrator",
            "Full access to every module",
            Module::ALL
                .iter()
                .map(|m| (*m, Action::ALL.to_vec()))
                .collect(),
        );

        let mut director_grants = view_all.clone();
        director_grants.extend(evaluations(&[View, Create, Update, Delete]));
        director_grants.push((Module::Cycles, vec![View, Create, Update]));
        director_grants.push((Module::Objectives, vec![View, Create, Update]));
        let director = role(
            "director",
            "Unit director: manages cycles, objectives and evaluations",
            director_grants,
        );

        let mut council_grants = evaluations(&[View]);
        council_grants.extend([
            (Module::Dashboard, vec![View]),
            (Module::Cycles, vec![View]),
            (Module::Reports, vec![View]),
            (Module::Homologation, vec![View, Update]),
            (Module::CycleHomologation, vec![View, Update]),
        ]);
        let council = role(
            "homologation_council",
            "Homologates submitted evaluations and closed cycles",
            council_grants,
        );

        let mut evaluator_grants = evaluations(&[View, Create, Update]);
        evaluator_grants.extend([
            (Module::Dashboard, vec![View]),
            (Module::Cycles, vec![View]),
            (Module::Employees, vec![View]),
            (Module::Competencies, vec![View]),
            (Module::Objectives, vec![View, Create, Update]),
        ]);
        let evaluator = role(
            "evaluator",
            "Rates subjects and records their objectives",
            evaluator_grants,
        );

        let employee = role(
            "employee",
            "Rates peers and internal service users",
            vec![
                (Module::Dashboard, vec![View]),
                (Module::Cycles, vec![View]),
                (Module::Objectives, vec![View]),
                (Module::PeerEvaluation, vec![View, Create, Update]),
                (Module::InternalUserEvaluation, vec![View, Create, Update]),
            ],
        );

        let auditor = role(
            "auditor",
            "Read-only access to the audit trail and reports",
            vec![
                (Module::Dashboard, vec![View]),
                (Module::Cycles, vec![View]),
                (Module::Reports, vec![View]),
                (Module::AuditLog, vec![View]),
            ],
        );

        let mut system_grants = view_all;
        system_grants.extend(evaluations(&[View, Create, Update]));
        system_grants.push((Module::Cycles, vec![View, Create, Update]));
        system_grants.push((Module::Objectives, vec![View, Create, Update]));
        let system = role(
            SYSTEM_ROLE,
            "Automated actions on behalf of raters",
            system_grants,
        );

        Self {
            roles: [
                administrator,
                director,
                council,
                evaluator,
                employee,
                auditor,
                system,
            ]
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect(),
            parents: BTreeMap::new(),
            hierarchical_scoping: false,
        }
    }

    pub fn role(&self, id: &RoleId) -> Option<&RoleDefinition> {
        self.roles.get(id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.values()
    }

    pub fn hierarchical_scoping(&self) -> bool {
        self.hierarchical_scoping
    }

    /// Whether `unit` equals `ancestor` or, with hierarchical scoping, sits
    /// below it.
    pub fn is_within(&self, unit: &OrgUnitId, ancestor: &OrgUnitId) -> bool {
        if unit == ancestor {
            return true;
        }
        if !self.hierarchical_scoping {
            return false;
        }
        let mut current = unit;
        for _ in 0..self.parents.len() {
            match self.parents.get(current) {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    fn covers(&self, scope: &Scope, ctx: &ScopeContext) -> bool {
        match scope {
            Scope::Global => true,
            Scope::OrgUnit(unit) => ctx
                .org_unit_id
                .as_ref()
                .is_some_and(|target| self.is_within(target, unit)),
        }
    }

    /// Decide whether `principal` may perform `action` on `module` within
    /// `ctx`. Effective permissions are the union over all assignments;
    /// assignments naming unknown roles grant nothing.
    pub fn authorize(
        &self,
        principal: &Principal,
        module: Module,
        action: Action,
        ctx: &ScopeContext,
    ) -> AuthzDecision {
        if principal.assignments.is_empty() {
            return AuthzDecision::Denied {
                reason: "principal has no role assignments".to_string(),
            };
        }

        let mut granted_out_of_scope = false;
        for assignment in &principal.assignments {
            let Some(role) = self.roles.get(&assignment.role_id) else {
                continue;
            };
            if !role.grants(module, action) {
                continue;
            }
            if self.covers(&assignment.scope, ctx) {
                return AuthzDecision::Allowed;
            }
            granted_out_of_scope = true;
        }

        let reason = if granted_out_of_scope {
            match &ctx.org_unit_id {
                Some(unit) => format!("{module}:{action} is not granted for org unit {unit}"),
                None => format!("{module}:{action} requires a global assignment"),
            }
        } else {
            format!("missing permission: {module}:{action}")
        };
        AuthzDecision::Denied { reason }
    }

    /// Every `(module, action)` the principal holds within `ctx`.
    pub fn effective_permissions(
        &self,
        principal: &Principal,
        ctx: &ScopeContext,
    ) -> BTreeSet<Permission> {
        principal
            .assignments
            .iter()
            .filter(|a| self.covers(&a.scope, ctx))
            .filter_map(|a| self.roles.get(&a.role_id))
            .flat_map(|role| role.permissions())
            .collect()
    }
}

fn role(id: &str, description: &str, grants: Vec<(Module, Vec<Action>)>) -> RoleDefinition {
    let mut map: BTreeMap<Module, BTreeSet<Action>> = BTreeMap::new();
    for (module, actions) in grants {
        map.entry(module).or_default().extend(actions);
    }
    RoleDefinition {
        id: RoleId::from(id),
        description: description.to_string(),
        grants: map,
    }
}

fn check_acyclic(parents: &BTreeMap<OrgUnitId, OrgUnitId>) -> Result<(), ConfigError> {
    for start in parents.keys() {
        let mut seen = BTreeSet::new();
        let mut current = start;
        while let Some(parent) = parents.get(current) {
            if !seen.insert(current) || parent == start {
                return Err(ConfigError::Invalid(format!(
                    "org unit hierarchy has a cycle through {start}"
                )));
            }
            current = parent;
        }
    }
    Ok(())
}
