//! Engine error taxonomy for Avaliar.

use std::fmt;

use avaliar_state::StorageError;
use serde::{Deserialize, Serialize};

use crate::permissions::{Action, Module};

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(fields: &[FieldIssue]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by engine operations.
///
/// Every variant is recoverable by the caller. Denials are normal outcomes,
/// not faults.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("permission denied: {action} on {module}: {reason}")]
    PermissionDenied {
        module: Module,
        action: Action,
        reason: String,
    },

    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("validation failed: {}", join_issues(.fields))]
    ValidationFailed { fields: Vec<FieldIssue> },

    #[error("duplicate evaluation for {key}")]
    DuplicateEvaluation { key: String },

    #[error("concurrent modification of {entity_type} {id}")]
    ConcurrentModification { entity_type: String, id: String },

    #[error("cycle {cycle_id} not ready: pending evaluations [{}]", .pending.join(", "))]
    CycleNotReady {
        cycle_id: String,
        pending: Vec<String>,
    },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Single-issue validation failure.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            fields: vec![FieldIssue::new(field, message)],
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
            StorageError::ConcurrentModification {
                entity_type, id, ..
            } => Self::ConcurrentModification { entity_type, id },
            StorageError::DuplicateEvaluation { key } => Self::DuplicateEvaluation { key },
            StorageError::AlreadyExists { entity_type, id } => {
                Self::invalid(entity_type, format!("{id} already exists"))
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
