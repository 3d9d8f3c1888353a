//! Permission matrix: who may do what, where.
//!
//! - `Module` / `Action` / `Permission`: the fixed vocabulary of grants
//! - `Principal` / `UserRoleAssignment` / `Scope`: the caller and its roles
//! - `PermissionMatrix`: pure `(principal, module, action, scope) → decision`
//! - `Operation`: maps each engine operation to the grant it needs

pub mod matrix;
pub mod module;
pub mod operation;
pub mod principal;

pub use matrix::{AuthzDecision, MatrixDocument, PermissionMatrix, RoleDefinition};
pub use module::{Action, Module, Permission};
pub use operation::Operation;
pub use principal::{Principal, Scope, ScopeContext, UserRoleAssignment, SYSTEM_ROLE};
