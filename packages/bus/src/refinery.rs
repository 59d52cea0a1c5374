//! Shipwright-Bus: Knowledge Refinery Contract
//!
//! The Refinery (normalize / fission / embed / cluster / fusion /
//! ontology-link / dedup) is an external subsystem. The core only depends on
//! this contract: hand over question/answer material, get back refined
//! knowledge plus the refinement metrics and their gate verdict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Minimum fraction of source statements the fission stage must cover.
pub const FISSION_COVERAGE_THRESHOLD: f64 = 0.85;
/// Minimum cross-cluster consensus required from the fusion stage.
pub const FUSION_CONSENSUS_THRESHOLD: f64 = 0.75;
/// Minimum overall acceptance rate for the refined output.
pub const ACCEPTANCE_THRESHOLD: f64 = 0.60;

/// Material handed to the Refinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

/// Metrics reported back by the Refinery stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefineryMetrics {
    pub fission_coverage: f64,
    pub fusion_consensus: f64,
    pub acceptance: f64,
}

impl RefineryMetrics {
    /// Apply the fixed refinery gate thresholds.
    pub fn evaluate(&self) -> RefineryGateReport {
        let mut failures = Vec::new();
        if self.fission_coverage < FISSION_COVERAGE_THRESHOLD {
            failures.push(format!(
                "fission coverage {:.2} below {FISSION_COVERAGE_THRESHOLD}",
                self.fission_coverage
            ));
        }
        if self.fusion_consensus < FUSION_CONSENSUS_THRESHOLD {
            failures.push(format!(
                "fusion consensus {:.2} below {FUSION_CONSENSUS_THRESHOLD}",
                self.fusion_consensus
            ));
        }
        if self.acceptance < ACCEPTANCE_THRESHOLD {
            failures.push(format!(
                "acceptance {:.2} below {ACCEPTANCE_THRESHOLD}",
                self.acceptance
            ));
        }
        RefineryGateReport {
            passed: failures.is_empty(),
            failures,
        }
    }
}

/// Verdict of the refinery gate thresholds over a metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineryGateReport {
    pub passed: bool,
    pub failures: Vec<String>,
}

/// Full response from a refine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineOutcome {
    /// Refined knowledge, opaque to the core
    pub refined: serde_json::Value,
    pub metrics: RefineryMetrics,
    pub gate: RefineryGateReport,
    pub duration_ms: u64,
}

/// Client contract to the external Refinery subsystem.
#[async_trait]
pub trait RefineryClient: Send + Sync {
    async fn refine(&self, request: RefineRequest) -> Result<RefineOutcome, BusError>;
}
