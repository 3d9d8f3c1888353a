//! Error types for avaliar-state

use thiserror::Error;

/// Errors raised while establishing or initialising a backend connection.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::storage_traits::EvaluationStore`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// A versioned write was based on a stale version.
    #[error(
        "concurrent modification of {entity_type} {id}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        entity_type: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// An evaluation already exists for the (cycle, subject, rater, kind) key.
    #[error("duplicate evaluation for {key}")]
    DuplicateEvaluation { key: String },

    /// A create targeted an id that is already taken.
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists { entity_type: String, id: String },

    /// Record (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
