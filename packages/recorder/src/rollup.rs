//! Shipwright-Recorder: Run Rollups
//!
//! Summaries are derived purely from the log; they hold no state of their
//! own and can be recomputed at any time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{CostRecord, LogEntry, RecordStatus};

/// Aggregate view of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    /// Step costs plus standalone cost lines
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub total_steps: usize,
    /// Fraction of steps with Success status, in [0, 1]
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    /// Per-phase rollups, keyed by phase name
    pub phase_metrics: BTreeMap<String, PhaseRollup>,
}

/// Aggregate view of one phase within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseRollup {
    pub steps: usize,
    pub cost_usd: f64,
    pub tokens: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

impl RunSummary {
    /// Compute the rollup from step entries and standalone cost lines.
    pub fn compute(run_id: &str, steps: &[LogEntry], costs: &[CostRecord]) -> Self {
        let total_steps = steps.len();
        let successes = steps
            .iter()
            .filter(|s| s.status == RecordStatus::Success)
            .count();

        let step_cost: f64 = steps.iter().map(|s| s.cost_usd).sum();
        let step_tokens: u64 = steps.iter().map(|s| s.cost_tokens).sum();
        let extra_cost: f64 = costs.iter().map(|c| c.usd).sum();
        let extra_tokens: u64 = costs.iter().map(|c| c.tokens).sum();

        let total_latency: u64 = steps.iter().map(|s| s.latency_ms).sum();

        let mut phase_metrics: BTreeMap<String, PhaseRollup> = BTreeMap::new();
        let mut phase_successes: BTreeMap<String, usize> = BTreeMap::new();
        let mut phase_latency: BTreeMap<String, u64> = BTreeMap::new();

        for step in steps {
            let rollup = phase_metrics.entry(step.phase.clone()).or_default();
            rollup.steps += 1;
            rollup.cost_usd += step.cost_usd;
            rollup.tokens += step.cost_tokens;
            if step.status == RecordStatus::Success {
                *phase_successes.entry(step.phase.clone()).or_default() += 1;
            }
            *phase_latency.entry(step.phase.clone()).or_default() += step.latency_ms;
        }
        for cost in costs {
            let rollup = phase_metrics.entry(cost.phase.clone()).or_default();
            rollup.cost_usd += cost.usd;
            rollup.tokens += cost.tokens;
        }
        for (phase, rollup) in phase_metrics.iter_mut() {
            if rollup.steps > 0 {
                rollup.success_rate =
                    *phase_successes.get(phase).unwrap_or(&0) as f64 / rollup.steps as f64;
                rollup.avg_latency_ms =
                    *phase_latency.get(phase).unwrap_or(&0) as f64 / rollup.steps as f64;
            }
        }

        Self {
            run_id: run_id.to_string(),
            total_cost_usd: step_cost + extra_cost,
            total_tokens: step_tokens + extra_tokens,
            total_steps,
            success_rate: if total_steps > 0 {
                successes as f64 / total_steps as f64
            } else {
                0.0
            },
            avg_latency_ms: if total_steps > 0 {
                total_latency as f64 / total_steps as f64
            } else {
                0.0
            },
            phase_metrics,
        }
    }
}
