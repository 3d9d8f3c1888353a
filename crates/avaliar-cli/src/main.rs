//! Avaliar - staff performance evaluation CLI
//!
//! The `avaliar` command drives evaluation cycles against the configured
//! store and permission matrix.
//!
//! ## Commands
//!
//! - `score`: Compute the final note (NAF) from four category averages
//! - `permissions`: Show a principal's effective permissions
//! - `matrix check`: Validate a permission matrix file
//! - `cycle`: Create, advance, close, homologate and delete cycles
//! - `objective`: Record objectives for a subject
//! - `evaluation`: Create, score, submit, homologate, return and void evaluations
//! - `audit`: Query, export and verify the audit log

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use avaliar_core::{
    init_tracing, verify_audit_export, CompetencyScoreInput, Engine, EngineConfig, NewCycle,
    NewEvaluation, ObjectiveInput, OperationSpan, PermissionMatrix, Principal, Score,
    ScoreAggregator, ScopeContext, TracingReportingHook, METRICS,
};
use avaliar_state::{
    AuditFilter, AuditOutcome, Classification, CompetencyId, CompetencyKind, CycleId, CycleKind,
    CycleRecord, EntityType, EvaluationFilter, EvaluationId, EvaluationKind, EvaluationRecord,
    EvaluationState, EvaluationStore, OrgUnitId, PrincipalId, SurrealEvaluationStore,
};

/// Environment variable naming the principal JSON file.
const PRINCIPAL_ENV: &str = "AVALIAR_PRINCIPAL";

#[derive(Parser)]
#[command(name = "avaliar")]
#[command(author = "Avaliar Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staff performance evaluation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Principal acting on the store (JSON file with id, system and assignments)
    #[arg(short, long, global = true, env = PRINCIPAL_ENV)]
    principal: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the final note from four category averages
    Score {
        /// Individual objectives average
        individual: f64,
        /// Team objectives average
        team: f64,
        /// Transversal competencies average
        transversal: f64,
        /// Technical competencies average
        technical: f64,
    },

    /// Show the effective permissions of the principal
    Permissions {
        /// Org unit the permissions apply to (global scope when omitted)
        #[arg(long)]
        org_unit: Option<String>,
    },

    /// Permission matrix tools
    Matrix {
        #[command(subcommand)]
        action: MatrixAction,
    },

    /// Evaluation cycle lifecycle
    Cycle {
        #[command(subcommand)]
        action: CycleAction,
    },

    /// Objectives of a subject within a cycle
    Objective {
        #[command(subcommand)]
        action: ObjectiveAction,
    },

    /// Evaluation workflow
    Evaluation {
        #[command(subcommand)]
        action: EvaluationAction,
    },

    /// Audit log queries and compliance exports
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum MatrixAction {
    /// Validate a TOML or JSON permission matrix
    Check {
        /// Matrix file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum CycleAction {
    /// Open a new cycle
    Create {
        /// Cycle id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        semester: u8,
        /// annual or semiannual
        #[arg(long, default_value = "annual", value_parser = parse_snake::<CycleKind>)]
        kind: CycleKind,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },
    /// Move an open cycle into mid-cycle review
    Advance {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Close a cycle once every evaluation is homologated or voided
    Close {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Homologate a closed cycle
    Homologate {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Soft-delete a cycle without evaluations
    Delete {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// List cycles
    List {
        /// Include soft-deleted cycles
        #[arg(long)]
        include_deleted: bool,
    },
    /// Aggregate notes and classifications of a cycle
    Summary { id: String },
}

#[derive(Subcommand)]
enum ObjectiveAction {
    /// Create or update an objective from a JSON file
    Record {
        /// Objective JSON (id, cycle_id, subject_id, kind, description, targets, score)
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// List objectives of a cycle visible to the caller
    List {
        #[arg(long)]
        cycle: String,
        #[arg(long)]
        subject: Option<String>,
    },
}

#[derive(Subcommand)]
enum EvaluationAction {
    /// Create a draft evaluation
    Create {
        #[arg(long)]
        cycle: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        rater: String,
        /// superior, peer, internal_user, external_user or midpoint_review
        #[arg(long, value_parser = parse_snake::<EvaluationKind>)]
        kind: EvaluationKind,
        #[arg(long)]
        org_unit: Option<String>,
    },
    /// Record one competency score
    Score {
        id: String,
        #[arg(long)]
        competency: String,
        /// transversal or technical
        #[arg(long, value_parser = parse_snake::<CompetencyKind>)]
        kind: CompetencyKind,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Submit a draft and freeze its note
    Submit {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Homologate a submitted evaluation
    Homologate {
        id: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Return a submitted evaluation to draft
    Return {
        id: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Void an evaluation
    Void {
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Show an evaluation and its competency scores
    Show { id: String },
    /// List visible evaluations
    List {
        #[arg(long)]
        cycle: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, value_parser = parse_snake::<EvaluationState>)]
        state: Option<EvaluationState>,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// List audit entries
    List {
        #[command(flatten)]
        filter: AuditFilterArgs,
    },
    /// Export audit entries with a SHA-256 digest sidecar
    Export {
        /// Subdirectory name for the export (e.g. a cycle id)
        #[arg(long)]
        label: String,
        /// Base directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[command(flatten)]
        filter: AuditFilterArgs,
    },
    /// Check an export against its digest sidecar
    Verify { path: PathBuf },
}

#[derive(Args)]
struct AuditFilterArgs {
    #[arg(long, value_parser = parse_snake::<EntityType>)]
    entity_type: Option<EntityType>,
    #[arg(long)]
    entity_id: Option<String>,
    #[arg(long)]
    actor: Option<String>,
    /// success or denied
    #[arg(long, value_parser = parse_snake::<AuditOutcome>)]
    outcome: Option<AuditOutcome>,
}

impl From<AuditFilterArgs> for AuditFilter {
    fn from(args: AuditFilterArgs) -> Self {
        Self {
            entity_type: args.entity_type,
            entity_id: args.entity_id,
            actor_id: args.actor.map(PrincipalId::from),
            outcome: args.outcome,
        }
    }
}

/// Parse a snake_case value through the type's serde representation.
fn parse_snake<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unrecognised value '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = EngineConfig::from_env().context("Failed to load engine configuration")?;
    let result = run(cli, &config).await;
    METRICS.flush();
    result
}

async fn run(cli: Cli, config: &EngineConfig) -> Result<()> {
    match cli.command {
        Commands::Score {
            individual,
            team,
            transversal,
            technical,
        } => cmd_score(config, individual, team, transversal, technical),
        Commands::Permissions { org_unit } => {
            let principal = load_principal(cli.principal.as_deref())?;
            cmd_permissions(config, &principal, org_unit.as_deref())
        }
        Commands::Matrix {
            action: MatrixAction::Check { path },
        } => cmd_matrix_check(&path),
        Commands::Audit {
            action: AuditAction::Verify { path },
        } => cmd_audit_verify(&path),
        Commands::Cycle { action } => {
            let (engine, principal) = session(config, cli.principal.as_deref()).await?;
            cmd_cycle(&engine, &principal, action).await
        }
        Commands::Objective { action } => {
            let (engine, principal) = session(config, cli.principal.as_deref()).await?;
            cmd_objective(&engine, &principal, action).await
        }
        Commands::Evaluation { action } => {
            let (engine, principal) = session(config, cli.principal.as_deref()).await?;
            cmd_evaluation(&engine, &principal, action).await
        }
        Commands::Audit { action } => {
            let (engine, principal) = session(config, cli.principal.as_deref()).await?;
            cmd_audit(&engine, &principal, action).await
        }
    }
}

/// Load the acting principal from its JSON file.
fn load_principal(path: Option<&Path>) -> Result<Principal> {
    let Some(path) = path else {
        bail!("this command needs a principal: pass --principal or set {PRINCIPAL_ENV}");
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read principal file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid principal file {}", path.display()))
}

/// Connect to the store from the environment and build the engine.
async fn session(
    config: &EngineConfig,
    principal: Option<&Path>,
) -> Result<(Engine<SurrealEvaluationStore>, Principal)> {
    let principal = load_principal(principal)?;
    let store = SurrealEvaluationStore::from_env()
        .await
        .context("Failed to connect to evaluation store")?;
    let engine = Engine::from_config(Arc::new(store), config)
        .context("Invalid engine configuration")?
        .with_reporting_hook(Arc::new(TracingReportingHook));
    info!(principal = %principal.id, "session opened");
    Ok((engine, principal))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn final_note(
    config: &EngineConfig,
    individual: f64,
    team: f64,
    transversal: f64,
    technical: f64,
) -> Result<(f64, Classification)> {
    let aggregator = ScoreAggregator::new(config.scoring)?;
    for value in [individual, team, transversal, technical] {
        Score::new(value)?;
    }
    Ok(aggregator.compute_final_note(individual, team, transversal, technical))
}

/// Compute and print a final note
fn cmd_score(
    config: &EngineConfig,
    individual: f64,
    team: f64,
    transversal: f64,
    technical: f64,
) -> Result<()> {
    let (note, classification) = final_note(config, individual, team, transversal, technical)?;
    let weights = config.scoring.weights;
    println!("NAF: {note:.2} ({classification})");
    println!(
        "  weights: individual {}%, team {}%, transversal {}%, technical {}%",
        weights.individual, weights.team, weights.transversal, weights.technical
    );
    Ok(())
}

/// Print the effective permissions of a principal
fn cmd_permissions(
    config: &EngineConfig,
    principal: &Principal,
    org_unit: Option<&str>,
) -> Result<()> {
    let matrix = config
        .load_matrix()
        .context("Failed to load permission matrix")?;
    let ctx = ScopeContext::from(org_unit.map(OrgUnitId::from));
    let granted = matrix.effective_permissions(principal, &ctx);

    let scope = org_unit.unwrap_or("global");
    if granted.is_empty() {
        println!("{} holds no permissions in {}", principal.id, scope);
        return Ok(());
    }
    println!("{} in {}:", principal.id, scope);
    for permission in granted {
        println!("  {permission}");
    }
    Ok(())
}

/// Validate a permission matrix file
fn cmd_matrix_check(path: &Path) -> Result<()> {
    let _span = OperationSpan::enter("matrix.check", &path.display().to_string());
    let matrix = PermissionMatrix::from_path(path)
        .with_context(|| format!("Invalid permission matrix {}", path.display()))?;

    println!(
        "{}: {} roles, hierarchical scoping {}",
        path.display(),
        matrix.roles().count(),
        if matrix.hierarchical_scoping() { "on" } else { "off" }
    );
    for role in matrix.roles() {
        println!("  {:<24} {} grants", role.id.as_str(), role.permissions().count());
    }
    Ok(())
}

fn print_cycle(verb: &str, cycle: &CycleRecord) {
    println!(
        "{} cycle {} ({}-S{}) -> {} (version {})",
        verb, cycle.id, cycle.year, cycle.semester, cycle.state, cycle.version
    );
}

async fn cmd_cycle<S: EvaluationStore>(
    engine: &Engine<S>,
    principal: &Principal,
    action: CycleAction,
) -> Result<()> {
    match action {
        CycleAction::Create {
            id,
            year,
            semester,
            kind,
            start,
            end,
        } => {
            let cycle = engine
                .create_cycle(
                    principal,
                    NewCycle {
                        id: id.map(CycleId::from),
                        year,
                        semester,
                        kind,
                        start_date: start,
                        end_date: end,
                    },
                )
                .await?;
            print_cycle("Created", &cycle);
        }
        CycleAction::Advance {
            id,
            expected_version,
        } => {
            let cycle = engine
                .start_mid_cycle_review(principal, &CycleId::from(id), expected_version)
                .await?;
            print_cycle("Advanced", &cycle);
        }
        CycleAction::Close {
            id,
            expected_version,
        } => {
            let cycle = engine
                .close_cycle(principal, &CycleId::from(id.as_str()), expected_version)
                .await
                .with_context(|| format!("Failed to close cycle '{id}'"))?;
            print_cycle("Closed", &cycle);
        }
        CycleAction::Homologate {
            id,
            expected_version,
        } => {
            let cycle = engine
                .homologate_cycle(principal, &CycleId::from(id), expected_version)
                .await?;
            print_cycle("Homologated", &cycle);
        }
        CycleAction::Delete {
            id,
            expected_version,
        } => {
            let cycle = engine
                .delete_cycle(principal, &CycleId::from(id.as_str()), expected_version)
                .await
                .with_context(|| format!("Failed to delete cycle '{id}'"))?;
            print_cycle("Deleted", &cycle);
        }
        CycleAction::List { include_deleted } => {
            let cycles = engine.list_cycles(principal, include_deleted).await?;
            if cycles.is_empty() {
                println!("No cycles found.");
            }
            for cycle in cycles {
                let deleted = if cycle.is_deleted() { " [deleted]" } else { "" };
                println!(
                    "{:<38} {}-S{} {} .. {}  {}{}",
                    cycle.id.as_str(),
                    cycle.year,
                    cycle.semester,
                    cycle.start_date,
                    cycle.end_date,
                    cycle.state,
                    deleted
                );
            }
        }
        CycleAction::Summary { id } => {
            let summary = engine.cycle_summary(principal, &CycleId::from(id)).await?;
            print_json(&summary)?;
        }
    }
    Ok(())
}

async fn cmd_objective<S: EvaluationStore>(
    engine: &Engine<S>,
    principal: &Principal,
    action: ObjectiveAction,
) -> Result<()> {
    match action {
        ObjectiveAction::Record {
            file,
            expected_version,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read objective file {}", file.display()))?;
            let input: ObjectiveInput = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid objective file {}", file.display()))?;
            let objective = engine
                .record_objective(principal, input, expected_version)
                .await?;
            println!(
                "Recorded objective {} for {} (version {})",
                objective.id, objective.subject_id, objective.version
            );
            if let Some(pct) = objective.completion_pct {
                println!("  completion: {pct:.2}%");
            }
        }
        ObjectiveAction::List { cycle, subject } => {
            let subject = subject.map(PrincipalId::from);
            let objectives = engine
                .list_objectives(principal, &CycleId::from(cycle), subject.as_ref())
                .await?;
            print_json(&objectives)?;
        }
    }
    Ok(())
}

fn print_evaluation(verb: &str, evaluation: &EvaluationRecord) {
    println!(
        "{} evaluation {} ({} of {} by {}) -> {} (version {})",
        verb,
        evaluation.id,
        evaluation.kind,
        evaluation.subject_id,
        evaluation.rater_id,
        evaluation.state,
        evaluation.version
    );
    if let (Some(note), Some(classification)) = (evaluation.final_note, evaluation.classification)
    {
        println!("  NAF: {note:.2} ({classification})");
    }
}

async fn cmd_evaluation<S: EvaluationStore>(
    engine: &Engine<S>,
    principal: &Principal,
    action: EvaluationAction,
) -> Result<()> {
    match action {
        EvaluationAction::Create {
            cycle,
            subject,
            rater,
            kind,
            org_unit,
        } => {
            let evaluation = engine
                .create_evaluation(
                    principal,
                    NewEvaluation {
                        cycle_id: CycleId::from(cycle),
                        subject_id: PrincipalId::from(subject),
                        rater_id: PrincipalId::from(rater),
                        kind,
                        org_unit_id: org_unit.map(OrgUnitId::from),
                    },
                )
                .await?;
            print_evaluation("Created", &evaluation);
        }
        EvaluationAction::Score {
            id,
            competency,
            kind,
            score,
            expected_version,
        } => {
            let record = engine
                .record_competency_score(
                    principal,
                    &EvaluationId::from(id),
                    CompetencyScoreInput {
                        competency_id: CompetencyId::from(competency),
                        kind,
                        score: Score::new(score)?,
                    },
                    expected_version,
                )
                .await?;
            println!(
                "Scored {} = {:.2} on evaluation {}",
                record.competency_id, record.score, record.evaluation_id
            );
        }
        EvaluationAction::Submit {
            id,
            expected_version,
        } => {
            let evaluation = engine
                .submit(principal, &EvaluationId::from(id), expected_version)
                .await?;
            print_evaluation("Submitted", &evaluation);
        }
        EvaluationAction::Homologate {
            id,
            expected_version,
        } => {
            let evaluation = engine
                .homologate(principal, &EvaluationId::from(id), expected_version)
                .await?;
            print_evaluation("Homologated", &evaluation);
        }
        EvaluationAction::Return {
            id,
            reason,
            expected_version,
        } => {
            let evaluation = engine
                .return_for_correction(
                    principal,
                    &EvaluationId::from(id),
                    reason.as_deref(),
                    expected_version,
                )
                .await?;
            print_evaluation("Returned", &evaluation);
        }
        EvaluationAction::Void {
            id,
            reason,
            expected_version,
        } => {
            let evaluation = engine
                .void(principal, &EvaluationId::from(id), &reason, expected_version)
                .await?;
            print_evaluation("Voided", &evaluation);
        }
        EvaluationAction::Show { id } => {
            let id = EvaluationId::from(id);
            let evaluation = engine.get_evaluation(principal, &id).await?;
            let scores = engine.competency_scores(principal, &id).await?;
            print_json(&serde_json::json!({
                "evaluation": evaluation,
                "competency_scores": scores,
            }))?;
        }
        EvaluationAction::List {
            cycle,
            subject,
            state,
        } => {
            let filter = EvaluationFilter {
                cycle_id: cycle.map(CycleId::from),
                subject_id: subject.map(PrincipalId::from),
                state,
                ..EvaluationFilter::default()
            };
            let evaluations = engine.list_evaluations(principal, &filter).await?;
            if evaluations.is_empty() {
                println!("No evaluations visible.");
            }
            for evaluation in evaluations {
                println!(
                    "{:<38} {:<16} {} <- {}  {}",
                    evaluation.id.as_str(),
                    evaluation.kind.as_str(),
                    evaluation.subject_id,
                    evaluation.rater_id,
                    evaluation.state
                );
            }
        }
    }
    Ok(())
}

async fn cmd_audit<S: EvaluationStore>(
    engine: &Engine<S>,
    principal: &Principal,
    action: AuditAction,
) -> Result<()> {
    match action {
        AuditAction::List { filter } => {
            let entries = engine.list_audit(principal, &filter.into()).await?;
            for entry in entries {
                let outcome = match entry.outcome {
                    AuditOutcome::Success => "ok",
                    AuditOutcome::Denied => "DENIED",
                };
                println!(
                    "{} {:<6} {:<36} {}/{} by {}",
                    entry.created_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    outcome,
                    entry.action,
                    entry.entity_type,
                    entry.entity_id,
                    entry
                        .actor_id
                        .as_ref()
                        .map(PrincipalId::as_str)
                        .unwrap_or("system")
                );
            }
        }
        AuditAction::Export { label, dir, filter } => {
            let receipt = engine
                .export_audit(principal, &filter.into(), &label, &dir)
                .await?;
            println!(
                "Exported {} entries to {}",
                receipt.entry_count,
                receipt.path.display()
            );
            println!("  sha256: {}", receipt.digest);
        }
        AuditAction::Verify { path } => cmd_audit_verify(&path)?,
    }
    Ok(())
}

/// Verify an audit export against its digest
fn cmd_audit_verify(path: &Path) -> Result<()> {
    if !verify_audit_export(path)? {
        bail!("digest mismatch for {}", path.display());
    }
    println!("{}: digest OK", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaliar_core::{AuditExportReceipt, UserRoleAssignment};
    use avaliar_state::MemoryEvaluationStore;

    fn admin() -> Principal {
        Principal::new("admin").with_assignment(UserRoleAssignment::global("administrator"))
    }

    fn memory_engine() -> Engine<MemoryEvaluationStore> {
        Engine::new(
            Arc::new(MemoryEvaluationStore::new()),
            Arc::new(PermissionMatrix::institutional_default()),
        )
    }

    fn create_cycle_action(id: &str) -> CycleAction {
        CycleAction::Create {
            id: Some(id.to_string()),
            year: 2025,
            semester: 1,
            kind: CycleKind::Annual,
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        }
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "avaliar",
            "evaluation",
            "create",
            "--cycle",
            "c-2025",
            "--subject",
            "ana",
            "--rater",
            "rui",
            "--kind",
            "internal_user",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Evaluation {
                action: EvaluationAction::Create {
                    kind: EvaluationKind::InternalUser,
                    ..
                }
            }
        ));

        assert!(Cli::try_parse_from([
            "avaliar", "evaluation", "create", "--cycle", "c", "--subject", "a", "--rater", "r",
            "--kind", "boss",
        ])
        .is_err());
    }

    #[test]
    fn test_score_uses_configured_policy() {
        let (note, classification) =
            final_note(&EngineConfig::default(), 4.0, 4.5, 5.0, 4.0).unwrap();
        assert_eq!(note, 4.30);
        assert_eq!(classification, Classification::Bom);

        assert!(final_note(&EngineConfig::default(), 4.0, 6.0, 5.0, 4.0).is_err());
    }

    #[test]
    fn test_load_principal_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("principal.json");
        std::fs::write(
            &path,
            r#"{"id": "dora", "assignments": [
                {"role_id": "evaluator", "scope": {"org_unit": "finance"}},
                {"role_id": "auditor", "scope": "global"}
            ]}"#,
        )
        .unwrap();

        let principal = load_principal(Some(&path)).unwrap();
        assert_eq!(principal.id, PrincipalId::from("dora"));
        assert!(!principal.system);
        assert_eq!(
            principal.assignments,
            vec![
                UserRoleAssignment::org_unit("evaluator", "finance"),
                UserRoleAssignment::global("auditor"),
            ]
        );

        let err = load_principal(None).unwrap_err();
        assert!(err.to_string().contains(PRINCIPAL_ENV));
    }

    #[test]
    fn test_matrix_check_rejects_cyclic_units() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("matrix.toml");
        std::fs::write(
            &good,
            r#"
            [[roles]]
            id = "auditor"
            grants = { audit_log = ["view"] }
            "#,
        )
        .unwrap();
        cmd_matrix_check(&good).unwrap();

        let bad = dir.path().join("cyclic.toml");
        std::fs::write(
            &bad,
            r#"
            roles = []

            [org_units]
            a = "b"
            b = "a"
            "#,
        )
        .unwrap();
        assert!(cmd_matrix_check(&bad).is_err());
    }

    #[tokio::test]
    async fn test_cycle_and_evaluation_commands() {
        let engine = memory_engine();
        let admin = admin();

        cmd_cycle(&engine, &admin, create_cycle_action("c-2025"))
            .await
            .unwrap();
        cmd_evaluation(
            &engine,
            &admin,
            EvaluationAction::Create {
                cycle: "c-2025".to_string(),
                subject: "ana".to_string(),
                rater: "admin".to_string(),
                kind: EvaluationKind::Superior,
                org_unit: None,
            },
        )
        .await
        .unwrap();

        let rows = engine
            .store()
            .find_evaluations(&EvaluationFilter::for_cycle(&CycleId::from("c-2025")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, EvaluationState::Draft);

        // Pending draft blocks closure after the review phase.
        cmd_cycle(
            &engine,
            &admin,
            CycleAction::Advance {
                id: "c-2025".to_string(),
                expected_version: None,
            },
        )
        .await
        .unwrap();
        let err = cmd_cycle(
            &engine,
            &admin,
            CycleAction::Close {
                id: "c-2025".to_string(),
                expected_version: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("c-2025"));
    }

    #[tokio::test]
    async fn test_objective_record_from_file() {
        let engine = memory_engine();
        let admin = admin();
        cmd_cycle(&engine, &admin, create_cycle_action("c-2025"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objective.json");
        std::fs::write(
            &path,
            r#"{
                "cycle_id": "c-2025",
                "subject_id": "ana",
                "kind": "individual",
                "description": "Close the ledger on time",
                "planned_target": 12.0,
                "achieved_target": 9.0,
                "score": 4.0
            }"#,
        )
        .unwrap();

        cmd_objective(
            &engine,
            &admin,
            ObjectiveAction::Record {
                file: path,
                expected_version: None,
            },
        )
        .await
        .unwrap();

        let objectives = engine
            .store()
            .find_objectives(&CycleId::from("c-2025"), None)
            .await
            .unwrap();
        assert_eq!(objectives.len(), 1);
        assert_eq!(objectives[0].completion_pct, Some(75.0));
    }

    #[tokio::test]
    async fn test_audit_verify_detects_tampering() {
        let engine = memory_engine();
        let admin = admin();
        cmd_cycle(&engine, &admin, create_cycle_action("c-2025"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let receipt: AuditExportReceipt = engine
            .export_audit(&admin, &AuditFilter::default(), "c-2025", dir.path())
            .await
            .unwrap();
        cmd_audit_verify(&receipt.path).unwrap();

        std::fs::write(&receipt.path, b"[]").unwrap();
        assert!(cmd_audit_verify(&receipt.path).is_err());
    }

    #[tokio::test]
    async fn test_commands_against_surreal_memory_store() {
        let store = SurrealEvaluationStore::in_memory().await.unwrap();
        let engine = Engine::new(
            Arc::new(store),
            Arc::new(PermissionMatrix::institutional_default()),
        );
        let admin = admin();

        cmd_cycle(&engine, &admin, create_cycle_action("c-2026"))
            .await
            .unwrap();
        cmd_cycle(
            &engine,
            &admin,
            CycleAction::List {
                include_deleted: false,
            },
        )
        .await
        .unwrap();

        let employee =
            Principal::new("eva").with_assignment(UserRoleAssignment::global("employee"));
        assert!(cmd_cycle(
            &engine,
            &employee,
            CycleAction::Delete {
                id: "c-2026".to_string(),
                expected_version: None,
            },
        )
        .await
        .is_err());
    }
}
