//! Engine facade shared by the evaluation workflow and the cycle lifecycle.
//!
//! Every operation follows the same path: authorize through the
//! [`PermissionMatrix`], validate, then commit the new state together with
//! one audit entry as a single [`WriteBatch`] carrying the version that was
//! read. Denials are audited on their own.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use avaliar_state::{
    AuditFilter, AuditLogEntry, CycleId, CycleRecord, EntityType, EvaluationStore, StorageError,
    WriteBatch,
};

use crate::audit::{write_audit_export, AuditExportReceipt, AuditRecorder};
use crate::config::EngineConfig;
use crate::domain::{EngineError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::permissions::{
    AuthzDecision, Operation, Permission, PermissionMatrix, Principal, ScopeContext,
};
use crate::reporting::CycleReportingHook;
use crate::scoring::ScoreAggregator;

/// The evaluation engine over a store `S`.
pub struct Engine<S> {
    pub(crate) store: Arc<S>,
    pub(crate) matrix: Arc<PermissionMatrix>,
    pub(crate) aggregator: ScoreAggregator,
    pub(crate) audit_denials: bool,
    pub(crate) reporting_hook: Option<Arc<dyn CycleReportingHook>>,
}

impl<S> Engine<S>
where
    S: EvaluationStore,
{
    /// Engine with the default scoring policy and denial auditing on.
    pub fn new(store: Arc<S>, matrix: Arc<PermissionMatrix>) -> Self {
        Self {
            store,
            matrix,
            aggregator: ScoreAggregator::default(),
            audit_denials: true,
            reporting_hook: None,
        }
    }

    /// Engine configured from an [`EngineConfig`].
    pub fn from_config(store: Arc<S>, config: &EngineConfig) -> Result<Self> {
        let matrix = config.load_matrix()?;
        let aggregator = ScoreAggregator::new(config.scoring)?;
        Ok(Self::new(store, Arc::new(matrix))
            .with_aggregator(aggregator)
            .with_denial_auditing(config.audit_denials))
    }

    pub fn with_aggregator(mut self, aggregator: ScoreAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_denial_auditing(mut self, enabled: bool) -> Self {
        self.audit_denials = enabled;
        self
    }

    pub fn with_reporting_hook(mut self, hook: Arc<dyn CycleReportingHook>) -> Self {
        self.reporting_hook = Some(hook);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    pub fn aggregator(&self) -> &ScoreAggregator {
        &self.aggregator
    }

    /// Advisory: every grant `principal` holds within `ctx`.
    pub fn effective_permissions(
        &self,
        principal: &Principal,
        ctx: &ScopeContext,
    ) -> BTreeSet<Permission> {
        self.matrix.effective_permissions(principal, ctx)
    }

    // -- shared plumbing -----------------------------------------------------

    pub(crate) async fn authorize(
        &self,
        principal: &Principal,
        op: Operation,
        ctx: &ScopeContext,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<()> {
        let permission = op.required_permission();
        match self
            .matrix
            .authorize(principal, permission.module, permission.action, ctx)
        {
            AuthzDecision::Allowed => Ok(()),
            AuthzDecision::Denied { reason } => {
                Err(self.deny(principal, op, entity_type, entity_id, reason).await)
            }
        }
    }

    /// Record a denial and build the matching error.
    pub(crate) async fn deny(
        &self,
        principal: &Principal,
        op: Operation,
        entity_type: EntityType,
        entity_id: &str,
        reason: String,
    ) -> EngineError {
        let permission = op.required_permission();
        METRICS.inc_denials();
        obs::emit_permission_denied(principal.id.as_str(), &permission.to_string(), &reason);

        if self.audit_denials {
            let metadata = json!({
                "principal_id": principal.id,
                "module": permission.module,
                "action": permission.action,
                "reason": reason,
            });
            if let Err(err) = AuditRecorder::record_denied(
                self.store.as_ref(),
                principal.actor_id(),
                op.audit_action(),
                entity_type,
                entity_id,
                metadata,
            )
            .await
            {
                obs::emit_audit_write_failed(op.audit_action(), &err);
            }
        }

        EngineError::PermissionDenied {
            module: permission.module,
            action: permission.action,
            reason,
        }
    }

    /// Compare a caller-supplied version with the one just read.
    pub(crate) fn check_version(
        &self,
        entity_type: EntityType,
        id: &str,
        expected: Option<u64>,
        actual: u64,
    ) -> Result<()> {
        match expected {
            Some(expected) if expected != actual => {
                METRICS.inc_conflicts();
                obs::emit_store_conflict(entity_type.as_str(), id);
                Err(EngineError::ConcurrentModification {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn commit(&self, batch: WriteBatch) -> Result<()> {
        match self.store.commit(batch).await {
            Ok(()) => {
                METRICS.inc_transitions();
                Ok(())
            }
            Err(StorageError::ConcurrentModification {
                entity_type, id, ..
            }) => {
                METRICS.inc_conflicts();
                obs::emit_store_conflict(&entity_type, &id);
                Err(EngineError::ConcurrentModification { entity_type, id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch a cycle that has not been soft-deleted.
    pub(crate) async fn load_active_cycle(&self, id: &CycleId) -> Result<CycleRecord> {
        let cycle = self.store.get_cycle(id).await?;
        if cycle.is_deleted() {
            return Err(EngineError::NotFound {
                entity_type: EntityType::Cycle.to_string(),
                id: id.to_string(),
            });
        }
        Ok(cycle)
    }

    // -- audit ---------------------------------------------------------------

    /// Audit entries matching `filter`, oldest first.
    #[instrument(skip(self, principal), fields(principal = %principal.id))]
    pub async fn list_audit(
        &self,
        principal: &Principal,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>> {
        self.authorize(
            principal,
            Operation::ViewAudit,
            &ScopeContext::global(),
            EntityType::AuditLogEntry,
            "*",
        )
        .await?;
        Ok(self.store.list_audit_entries(filter).await?)
    }

    /// Export entries matching `filter` under `dir/<label>/` with a digest
    /// sidecar.
    #[instrument(skip(self, principal, dir), fields(principal = %principal.id))]
    pub async fn export_audit(
        &self,
        principal: &Principal,
        filter: &AuditFilter,
        label: &str,
        dir: &Path,
    ) -> Result<AuditExportReceipt> {
        let entries = self.list_audit(principal, filter).await?;
        let receipt = write_audit_export(label, &entries, dir)?;
        obs::emit_audit_exported(
            &receipt.path.display().to_string(),
            receipt.entry_count,
            &receipt.digest,
        );
        Ok(receipt)
    }
}
