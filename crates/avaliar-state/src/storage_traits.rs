//! Storage trait definitions for Avaliar
//!
//! The engine reaches persistence only through [`EvaluationStore`]:
//! - typed reads (`get_*`, `find_*`, `list_*`)
//! - a single atomic write entry point, [`EvaluationStore::commit`], taking a
//!   [`WriteBatch`] of creates, versioned updates and audit appends
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

generated_id!(
    /// Evaluation cycle identifier
    CycleId
);
generated_id!(
    /// Evaluation identifier
    EvaluationId
);
generated_id!(
    /// Objective identifier
    ObjectiveId
);
generated_id!(
    /// Competency score row identifier
    CompetencyScoreId
);
generated_id!(
    /// Audit log entry identifier
    AuditEntryId
);
string_id!(
    /// Authenticated principal (employee, rater, administrator, service)
    PrincipalId
);
string_id!(
    /// Competency catalogue identifier
    CompetencyId
);
string_id!(
    /// Organisational unit identifier
    OrgUnitId
);
string_id!(
    /// Role identifier within a permission matrix
    RoleId
);

// ---------------------------------------------------------------------------
// Entity type tags
// ---------------------------------------------------------------------------

/// Kind of entity addressed by a write or an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Cycle,
    Objective,
    CompetencyScore,
    Evaluation,
    AuditLogEntry,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::Objective => "objective",
            Self::CompetencyScore => "competency_score",
            Self::Evaluation => "evaluation",
            Self::AuditLogEntry => "audit_log_entry",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Length of an evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Annual,
    Semiannual,
}

/// Lifecycle state of an evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Open,
    MidCycleReview,
    Closed,
    Homologated,
}

impl CycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::MidCycleReview => "mid_cycle_review",
            Self::Closed => "closed",
            Self::Homologated => "homologated",
        }
    }

    /// Whether evaluations and objectives may still be created or edited.
    pub fn accepts_work(self) -> bool {
        matches!(self, Self::Open | Self::MidCycleReview)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: CycleId,
    pub year: i32,
    pub semester: u8,
    pub kind: CycleKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub state: CycleState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// Set when an empty cycle is soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CycleRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Objective / CompetencyScore
// ---------------------------------------------------------------------------

/// Objective category feeding the NAF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    Individual,
    Team,
}

/// Objective owned by a (cycle, subject) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveRecord {
    pub id: ObjectiveId,
    pub cycle_id: CycleId,
    pub subject_id: PrincipalId,
    /// Org unit the subject is evaluated under; scopes access to the objective.
    #[serde(default)]
    pub org_unit_id: Option<OrgUnitId>,
    pub kind: ObjectiveKind,
    pub description: String,
    pub planned_target: f64,
    pub achieved_target: Option<f64>,
    pub completion_pct: Option<f64>,
    /// Entered score in [1,5]; `None` until scored.
    pub score: Option<f64>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Competency category feeding the NAF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetencyKind {
    Transversal,
    Technical,
}

/// One competency rated within one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyScoreRecord {
    pub id: CompetencyScoreId,
    pub evaluation_id: EvaluationId,
    pub competency_id: CompetencyId,
    pub kind: CompetencyKind,
    pub score: f64,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Who is rating the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    Superior,
    Peer,
    InternalUser,
    ExternalUser,
    MidpointReview,
}

impl EvaluationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superior => "superior",
            Self::Peer => "peer",
            Self::InternalUser => "internal_user",
            Self::ExternalUser => "external_user",
            Self::MidpointReview => "midpoint_review",
        }
    }
}

impl fmt::Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationState {
    Draft,
    Submitted,
    Homologated,
    Voided,
}

impl EvaluationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Homologated => "homologated",
            Self::Voided => "voided",
        }
    }

    /// Still blocks cycle closure.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Draft | Self::Submitted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Homologated | Self::Voided)
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative grade derived from the final note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Mau,
    Insuficiente,
    Suficiente,
    Bom,
    MuitoBom,
}

impl Classification {
    /// All grades, lowest first.
    pub const ALL: [Classification; 5] = [
        Self::Mau,
        Self::Insuficiente,
        Self::Suficiente,
        Self::Bom,
        Self::MuitoBom,
    ];

    /// Institutional label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Mau => "Mau",
            Self::Insuficiente => "Insuficiente",
            Self::Suficiente => "Suficiente",
            Self::Bom => "Bom",
            Self::MuitoBom => "Muito Bom",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Category averages frozen alongside the final note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryAverages {
    pub individual: f64,
    pub team: f64,
    pub transversal: f64,
    pub technical: f64,
}

/// Uniqueness key of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationKey {
    pub cycle_id: CycleId,
    pub subject_id: PrincipalId,
    pub rater_id: PrincipalId,
    pub kind: EvaluationKind,
}

impl fmt::Display for EvaluationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cycle_id, self.subject_id, self.rater_id, self.kind
        )
    }
}

/// Persisted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: EvaluationId,
    pub cycle_id: CycleId,
    pub subject_id: PrincipalId,
    pub rater_id: PrincipalId,
    pub kind: EvaluationKind,
    /// Org unit owning the subject; scope context for authorization.
    pub org_unit_id: Option<OrgUnitId>,
    pub state: EvaluationState,
    pub final_note: Option<f64>,
    pub classification: Option<Classification>,
    pub category_averages: Option<CategoryAverages>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub homologated_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl EvaluationRecord {
    pub fn key(&self) -> EvaluationKey {
        EvaluationKey {
            cycle_id: self.cycle_id.clone(),
            subject_id: self.subject_id.clone(),
            rater_id: self.rater_id.clone(),
            kind: self.kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
}

/// Append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    /// `None` for system-initiated actions.
    pub actor_id: Option<PrincipalId>,
    pub action: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Predicate over evaluations; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationFilter {
    pub cycle_id: Option<CycleId>,
    pub subject_id: Option<PrincipalId>,
    pub rater_id: Option<PrincipalId>,
    pub kind: Option<EvaluationKind>,
    pub state: Option<EvaluationState>,
}

impl EvaluationFilter {
    pub fn for_cycle(cycle_id: &CycleId) -> Self {
        Self {
            cycle_id: Some(cycle_id.clone()),
            ..Self::default()
        }
    }

    pub fn for_key(key: &EvaluationKey) -> Self {
        Self {
            cycle_id: Some(key.cycle_id.clone()),
            subject_id: Some(key.subject_id.clone()),
            rater_id: Some(key.rater_id.clone()),
            kind: Some(key.kind),
            state: None,
        }
    }

    pub fn with_subject(mut self, subject_id: &PrincipalId) -> Self {
        self.subject_id = Some(subject_id.clone());
        self
    }

    pub fn with_state(mut self, state: EvaluationState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, record: &EvaluationRecord) -> bool {
        self.cycle_id.as_ref().is_none_or(|c| *c == record.cycle_id)
            && self
                .subject_id
                .as_ref()
                .is_none_or(|s| *s == record.subject_id)
            && self.rater_id.as_ref().is_none_or(|r| *r == record.rater_id)
            && self.kind.is_none_or(|k| k == record.kind)
            && self.state.is_none_or(|s| s == record.state)
    }
}

/// Predicate over audit entries; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub actor_id: Option<PrincipalId>,
    pub outcome: Option<AuditOutcome>,
}

impl AuditFilter {
    pub fn for_entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.entity_type.is_none_or(|t| t == entry.entity_type)
            && self
                .entity_id
                .as_ref()
                .is_none_or(|id| *id == entry.entity_id)
            && self
                .actor_id
                .as_ref()
                .is_none_or(|a| entry.actor_id.as_ref() == Some(a))
            && self.outcome.is_none_or(|o| o == entry.outcome)
    }
}

// ---------------------------------------------------------------------------
// WriteBatch: atomic unit of work
// ---------------------------------------------------------------------------

/// A single write inside a [`WriteBatch`].
///
/// Updates carry the version the caller read; the store rejects the whole
/// batch when any of them is stale and stores the record with
/// `version = expected_version + 1`. Creates are stored with `version = 1`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    CreateCycle(CycleRecord),
    UpdateCycle {
        record: CycleRecord,
        expected_version: u64,
    },
    /// Fails with `DuplicateEvaluation` when the record's key is taken.
    CreateEvaluation(EvaluationRecord),
    UpdateEvaluation {
        record: EvaluationRecord,
        expected_version: u64,
    },
    /// Create when `expected_version` is `None`, versioned update otherwise.
    PutObjective {
        record: ObjectiveRecord,
        expected_version: Option<u64>,
    },
    /// Create when `expected_version` is `None`, versioned update otherwise.
    PutCompetencyScore {
        record: CompetencyScoreRecord,
        expected_version: Option<u64>,
    },
    AppendAudit(AuditLogEntry),
}

/// Ordered set of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn create_cycle(&mut self, record: CycleRecord) -> &mut Self {
        self.push(WriteOp::CreateCycle(record))
    }

    pub fn update_cycle(&mut self, record: CycleRecord, expected_version: u64) -> &mut Self {
        self.push(WriteOp::UpdateCycle {
            record,
            expected_version,
        })
    }

    pub fn create_evaluation(&mut self, record: EvaluationRecord) -> &mut Self {
        self.push(WriteOp::CreateEvaluation(record))
    }

    pub fn update_evaluation(
        &mut self,
        record: EvaluationRecord,
        expected_version: u64,
    ) -> &mut Self {
        self.push(WriteOp::UpdateEvaluation {
            record,
            expected_version,
        })
    }

    pub fn put_objective(
        &mut self,
        record: ObjectiveRecord,
        expected_version: Option<u64>,
    ) -> &mut Self {
        self.push(WriteOp::PutObjective {
            record,
            expected_version,
        })
    }

    pub fn put_competency_score(
        &mut self,
        record: CompetencyScoreRecord,
        expected_version: Option<u64>,
    ) -> &mut Self {
        self.push(WriteOp::PutCompetencyScore {
            record,
            expected_version,
        })
    }

    pub fn append_audit(&mut self, entry: AuditLogEntry) -> &mut Self {
        self.push(WriteOp::AppendAudit(entry))
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// EvaluationStore
// ---------------------------------------------------------------------------

/// Persistence collaborator of the evaluation engine.
///
/// Guarantees:
/// - `commit` applies every op of a batch or none of them.
/// - A versioned update whose `expected_version` differs from the stored
///   version fails with `StorageError::ConcurrentModification`.
/// - `CreateEvaluation` checks the (cycle, subject, rater, kind) key inside
///   the same atomic unit as the insert.
/// - Audit entries are never updated or deleted.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Fetch a cycle by id. Returns `StorageError::NotFound` if absent.
    async fn get_cycle(&self, id: &CycleId) -> StorageResult<CycleRecord>;

    /// List cycles, newest year first.
    async fn list_cycles(&self, include_deleted: bool) -> StorageResult<Vec<CycleRecord>>;

    /// Fetch an evaluation by id. Returns `StorageError::NotFound` if absent.
    async fn get_evaluation(&self, id: &EvaluationId) -> StorageResult<EvaluationRecord>;

    /// Find evaluations matching a filter.
    async fn find_evaluations(
        &self,
        filter: &EvaluationFilter,
    ) -> StorageResult<Vec<EvaluationRecord>>;

    /// Fetch an objective by id. Returns `StorageError::NotFound` if absent.
    async fn get_objective(&self, id: &ObjectiveId) -> StorageResult<ObjectiveRecord>;

    /// Objectives of a cycle, optionally restricted to one subject.
    async fn find_objectives(
        &self,
        cycle_id: &CycleId,
        subject_id: Option<&PrincipalId>,
    ) -> StorageResult<Vec<ObjectiveRecord>>;

    /// Competency scores recorded within one evaluation.
    async fn find_competency_scores(
        &self,
        evaluation_id: &EvaluationId,
    ) -> StorageResult<Vec<CompetencyScoreRecord>>;

    /// Audit entries matching a filter, oldest first.
    async fn list_audit_entries(&self, filter: &AuditFilter) -> StorageResult<Vec<AuditLogEntry>>;

    /// Apply a batch atomically.
    async fn commit(&self, batch: WriteBatch) -> StorageResult<()>;
}
