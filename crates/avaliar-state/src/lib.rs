//! Avaliar-State: persistence layer for the Avaliar evaluation engine
//!
//! Stores evaluation cycles, evaluations, objectives, competency scores and
//! the append-only audit log behind one async trait.
//!
//! ## Key Components
//!
//! - `EvaluationStore`: typed reads plus an atomic `commit(WriteBatch)`
//! - `MemoryEvaluationStore`: in-memory fake for tests and dry runs
//! - `SurrealEvaluationStore`: SurrealDB backend (memory, local file, cloud)

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::MemoryEvaluationStore;
pub use handle::{
    connect_cloud, connect_from_env, connect_memory, CloudConfig, DEFAULT_DATABASE,
    DEFAULT_LOCAL_PATH, DEFAULT_NAMESPACE, ENDPOINT_ENV, URL_ENV,
};
pub use storage_traits::{
    AuditEntryId, AuditFilter, AuditLogEntry, AuditOutcome, CategoryAverages, Classification,
    CompetencyId, CompetencyKind, CompetencyScoreId, CompetencyScoreRecord, CycleId, CycleKind,
    CycleRecord, CycleState, EntityType, EvaluationFilter, EvaluationId, EvaluationKey,
    EvaluationKind, EvaluationRecord, EvaluationState, EvaluationStore, ObjectiveId,
    ObjectiveKind, ObjectiveRecord, OrgUnitId, PrincipalId, RoleId, StorageResult, WriteBatch,
    WriteOp,
};
pub use surreal_store::SurrealEvaluationStore;

/// Result type for avaliar-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
