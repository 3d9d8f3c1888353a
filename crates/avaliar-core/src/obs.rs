//! Structured observability hooks for engine events.
//!
//! Every event carries an `event = "<domain>.<verb>"` field so log pipelines
//! can filter on it. Async engine operations get their span from
//! `#[instrument]`; [`OperationSpan`] covers synchronous scopes.

use tracing::{info, warn};

/// RAII guard that enters an operation-scoped span for a synchronous block.
///
/// Do not hold it across `.await`.
pub struct OperationSpan {
    _span: tracing::span::EnteredSpan,
}

impl OperationSpan {
    pub fn enter(operation: &str, target: &str) -> Self {
        let span = tracing::info_span!("avaliar.op", operation = %operation, target = %target);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: evaluation draft created.
pub fn emit_evaluation_created(evaluation_id: &str, kind: &str, cycle_id: &str) {
    info!(
        event = "evaluation.created",
        evaluation_id = %evaluation_id,
        kind = %kind,
        cycle_id = %cycle_id,
    );
}

/// Emit event: evaluation moved between states.
pub fn emit_evaluation_transitioned(evaluation_id: &str, from: &str, to: &str, version: u64) {
    info!(
        event = "evaluation.transitioned",
        evaluation_id = %evaluation_id,
        from = %from,
        to = %to,
        version = version,
    );
}

/// Emit event: final note frozen at submission.
pub fn emit_note_frozen(evaluation_id: &str, final_note: f64, classification: &str) {
    info!(
        event = "evaluation.note_frozen",
        evaluation_id = %evaluation_id,
        final_note = final_note,
        classification = %classification,
    );
}

/// Emit event: cycle moved between states.
pub fn emit_cycle_transitioned(cycle_id: &str, from: &str, to: &str) {
    info!(event = "cycle.transitioned", cycle_id = %cycle_id, from = %from, to = %to);
}

/// Emit event: an authorization check denied an operation.
pub fn emit_permission_denied(principal_id: &str, permission: &str, reason: &str) {
    warn!(
        event = "authz.denied",
        principal_id = %principal_id,
        permission = %permission,
        reason = %reason,
    );
}

/// Emit event: optimistic concurrency conflict.
pub fn emit_store_conflict(entity_type: &str, entity_id: &str) {
    warn!(event = "store.conflict", entity_type = %entity_type, entity_id = %entity_id);
}

/// Emit event: denied attempt could not be written to the audit log.
pub fn emit_audit_write_failed(action: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.write_failed", action = %action, error = %error);
}

/// Emit event: audit export written.
pub fn emit_audit_exported(path: &str, entry_count: usize, digest: &str) {
    info!(
        event = "audit.exported",
        path = %path,
        entry_count = entry_count,
        digest = %digest,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_span_create() {
        let _span = OperationSpan::enter("matrix.check", "matrix.toml");
        emit_cycle_transitioned("c-2025", "open", "mid_cycle_review");
    }
}
