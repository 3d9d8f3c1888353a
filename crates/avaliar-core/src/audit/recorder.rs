//! Append-only audit recording.
//!
//! Successful mutations stage their entry into the same [`WriteBatch`] as the
//! state change, so both commit or neither does. Denied attempts have no
//! state change and are committed on their own.

use chrono::Utc;
use serde_json::Value;

use avaliar_state::{
    AuditEntryId, AuditLogEntry, AuditOutcome, EntityType, EvaluationStore, PrincipalId,
    StorageResult, WriteBatch,
};

/// Builds and stages audit log entries.
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn entry(
        actor_id: Option<&PrincipalId>,
        action: &str,
        entity_type: EntityType,
        entity_id: &str,
        outcome: AuditOutcome,
        metadata: Value,
    ) -> AuditLogEntry {
        AuditLogEntry {
            id: AuditEntryId::new(),
            actor_id: actor_id.cloned(),
            action: action.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
            outcome,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Stage a success entry into `batch`, returning its id.
    pub fn record(
        batch: &mut WriteBatch,
        actor_id: Option<&PrincipalId>,
        action: &str,
        entity_type: EntityType,
        entity_id: &str,
        metadata: Value,
    ) -> AuditEntryId {
        let entry = Self::entry(
            actor_id,
            action,
            entity_type,
            entity_id,
            AuditOutcome::Success,
            metadata,
        );
        let id = entry.id.clone();
        batch.append_audit(entry);
        id
    }

    /// Commit a standalone entry for a denied attempt.
    pub async fn record_denied<S>(
        store: &S,
        actor_id: Option<&PrincipalId>,
        action: &str,
        entity_type: EntityType,
        entity_id: &str,
        metadata: Value,
    ) -> StorageResult<AuditEntryId>
    where
        S: EvaluationStore + ?Sized,
    {
        let entry = Self::entry(
            actor_id,
            action,
            entity_type,
            entity_id,
            AuditOutcome::Denied,
            metadata,
        );
        let id = entry.id.clone();
        let mut batch = WriteBatch::new();
        batch.append_audit(entry);
        store.commit(batch).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaliar_state::{AuditFilter, MemoryEvaluationStore, WriteOp};

    #[test]
    fn test_record_stages_success_entry() {
        let mut batch = WriteBatch::new();
        let actor = PrincipalId::from("rui");
        let id = AuditRecorder::record(
            &mut batch,
            Some(&actor),
            "evaluation.submit",
            EntityType::Evaluation,
            "ev-1",
            serde_json::json!({"final_note": 4.3}),
        );

        assert_eq!(batch.len(), 1);
        let WriteOp::AppendAudit(entry) = &batch.ops()[0] else {
            panic!("expected audit append");
        };
        assert_eq!(entry.id, id);
        assert_eq!(entry.outcome, AuditOutcome::Success);
        assert_eq!(entry.actor_id.as_ref(), Some(&actor));
    }

    #[tokio::test]
    async fn test_record_denied_commits_alone() {
        let store = MemoryEvaluationStore::new();
        AuditRecorder::record_denied(
            &store,
            None,
            "cycle.close",
            EntityType::Cycle,
            "c-2025",
            serde_json::json!({"reason": "missing permission"}),
        )
        .await
        .unwrap();

        let entries = store
            .list_audit_entries(&AuditFilter::for_entity(EntityType::Cycle, "c-2025"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AuditOutcome::Denied);
        assert!(entries[0].actor_id.is_none());
    }
}
