//! SurrealDB schema migrations and initialization
//!
//! Defines every Avaliar table with its indexes and permissions. Safe to call
//! multiple times (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Avaliar tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Avaliar SurrealDB schema");

    init_cycles_table(db).await?;
    init_evaluations_table(db).await?;
    init_objectives_table(db).await?;
    init_competency_scores_table(db).await?;
    init_audit_log_table(db).await?;

    info!("Avaliar schema initialization complete");
    Ok(())
}

/// Initialize `cycles` table
///
/// Cycles are never physically deleted; empty cycles are soft-deleted through
/// the `deleted` column.
async fn init_cycles_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing cycles table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS cycles AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_cycle_id ON TABLE cycles COLUMNS cycle_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_cycle_state ON TABLE cycles COLUMNS state;
    "#;

    db.query(sql).await?;
    info!("✓ cycles table initialized");
    Ok(())
}

/// Initialize `evaluations` table
///
/// Constraints:
/// - `evaluation_id` is unique
/// - `(cycle_id, subject_id, rater_id, kind)` is unique (one evaluation per
///   rater and kind for a subject within a cycle)
async fn init_evaluations_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing evaluations table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS evaluations AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_evaluation_id ON TABLE evaluations COLUMNS evaluation_id UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_evaluation_key ON TABLE evaluations
            COLUMNS cycle_id, subject_id, rater_id, kind UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_evaluation_cycle_state ON TABLE evaluations COLUMNS cycle_id, state;
    "#;

    db.query(sql).await?;
    info!("✓ evaluations table initialized");
    Ok(())
}

/// Initialize `objectives` table
async fn init_objectives_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing objectives table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS objectives AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_objective_id ON TABLE objectives COLUMNS objective_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_objective_owner ON TABLE objectives COLUMNS cycle_id, subject_id;
    "#;

    db.query(sql).await?;
    info!("✓ objectives table initialized");
    Ok(())
}

/// Initialize `competency_scores` table
async fn init_competency_scores_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing competency_scores table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS competency_scores AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_competency_score_id ON TABLE competency_scores
            COLUMNS competency_score_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_competency_score_evaluation ON TABLE competency_scores
            COLUMNS evaluation_id;
    "#;

    db.query(sql).await?;
    info!("✓ competency_scores table initialized");
    Ok(())
}

/// Initialize `audit_log` table
///
/// Append-only: updates and deletes are refused at the table level.
async fn init_audit_log_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing audit_log table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS audit_log AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_audit_entry_id ON TABLE audit_log COLUMNS entry_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_audit_entity ON TABLE audit_log COLUMNS entity_type, entity_id;
        DEFINE INDEX IF NOT EXISTS idx_audit_actor ON TABLE audit_log COLUMNS actor_id;
    "#;

    db.query(sql).await?;
    info!("✓ audit_log table initialized");
    Ok(())
}
