//! Read-only cycle aggregates and the post-homologation reporting hook.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use avaliar_state::{
    Classification, CycleId, CycleRecord, CycleState, EvaluationRecord, EvaluationState,
};

use crate::scoring::round_half_up;

/// Aggregate view of one cycle's evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: CycleId,
    pub state: CycleState,
    /// Evaluation counts per state, voided included.
    pub by_state: BTreeMap<EvaluationState, usize>,
    /// Homologated evaluations contributing to the aggregates below.
    pub homologated: usize,
    /// Mean final note over homologated evaluations, two decimals.
    pub average_note: Option<f64>,
    pub distribution: BTreeMap<Classification, usize>,
}

/// Build the summary of `cycle` from its evaluations. Voided evaluations
/// are counted per state but never enter the aggregates.
pub fn summarize(cycle: &CycleRecord, evaluations: &[EvaluationRecord]) -> CycleSummary {
    let mut by_state = BTreeMap::new();
    let mut distribution = BTreeMap::new();
    let mut notes = Vec::new();

    for ev in evaluations.iter().filter(|e| e.cycle_id == cycle.id) {
        *by_state.entry(ev.state).or_insert(0) += 1;
        if ev.state != EvaluationState::Homologated {
            continue;
        }
        if let Some(note) = ev.final_note {
            notes.push(note);
        }
        if let Some(class) = ev.classification {
            *distribution.entry(class).or_insert(0) += 1;
        }
    }

    let average_note = if notes.is_empty() {
        None
    } else {
        Some(round_half_up(notes.iter().sum::<f64>() / notes.len() as f64))
    };

    CycleSummary {
        cycle_id: cycle.id.clone(),
        state: cycle.state,
        by_state,
        homologated: notes.len(),
        average_note,
        distribution,
    }
}

/// Receives homologated cycles so statistics can be produced elsewhere.
#[async_trait]
pub trait CycleReportingHook: Send + Sync {
    async fn cycle_homologated(&self, cycle: &CycleRecord, summary: &CycleSummary);
}

/// Hook that logs the summary as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportingHook;

#[async_trait]
impl CycleReportingHook for TracingReportingHook {
    async fn cycle_homologated(&self, cycle: &CycleRecord, summary: &CycleSummary) {
        info!(
            event = "cycle.reported",
            cycle_id = %cycle.id,
            homologated = summary.homologated,
            average_note = ?summary.average_note,
        );
    }
}
