//! Shipwright-Gatekeeper: Gate Evaluation
//!
//! One evaluation path for every gate. Given the presented artifacts and the
//! observed metric readings, it produces the per-metric verdicts, the
//! weighted score, the overall status, an evidence pack, a decision with
//! reasons and required actions, and remediation recommendations.
//!
//! Gate failures are values, never errors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rubric::{ComparisonOp, GateRubric};

/// Observed readings keyed by metric id. Booleans are 1.0 / 0.0.
pub type MetricReadings = HashMap<String, f64>;

/// An artifact presented to the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub artifact_type: String,
}

impl ArtifactRef {
    pub fn new(id: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifact_type: artifact_type.into(),
        }
    }
}

/// Overall gate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    /// Passed, but within 10 points of the minimum score
    Warn,
    Fail,
}

/// Decision attached to the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pass,
    Fail,
    /// Structural failure (missing required artifacts) that remediation
    /// strategies cannot synthesize; needs a decision above the loop
    Escalate,
}

/// Verdict for one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_id: String,
    /// Observed value; None when no reading was reported
    pub actual: Option<f64>,
    pub op: ComparisonOp,
    pub threshold: f64,
    pub weight: f64,
    pub required: bool,
    pub passed: bool,
}

/// The bundle that justifies a gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePack {
    pub required_artifacts: Vec<String>,
    pub presented_artifacts: Vec<ArtifactRef>,
    pub missing_artifacts: Vec<String>,
    pub rubric_scores: Vec<MetricResult>,
    /// Filled in by the coordinator from tool invocations
    pub tool_provenance: Vec<String>,
    /// Filled in from QA artifacts when present
    pub test_reports: Vec<String>,
    /// Human approvals collected so far
    pub approvals: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Full result of evaluating one gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub gate: String,
    pub status: GateStatus,
    /// Weighted score, 0-100
    pub score: u32,
    pub evidence: EvidencePack,
    pub decision: GateDecision,
    pub reasons: Vec<String>,
    pub required_actions: Vec<String>,
    pub next_steps: Vec<String>,
    pub recommendations: Vec<String>,
    /// Failed metric ids plus structural tags; drives auto-fix strategy
    /// selection in the loop driver
    pub issue_tags: Vec<String>,
}

impl GateEvaluation {
    pub fn passed(&self) -> bool {
        matches!(self.status, GateStatus::Pass | GateStatus::Warn)
    }
}

impl GateRubric {
    /// Evaluate this rubric against presented artifacts and readings.
    pub fn evaluate(&self, artifacts: &[ArtifactRef], readings: &MetricReadings) -> GateEvaluation {
        let missing_artifacts: Vec<String> = self
            .required_artifact_types
            .iter()
            .filter(|required| !artifacts.iter().any(|a| &a.artifact_type == *required))
            .cloned()
            .collect();

        let metric_results: Vec<MetricResult> = self
            .metrics
            .iter()
            .map(|metric| {
                let actual = readings.get(&metric.id).copied();
                let passed = actual.is_some_and(|value| metric.op.apply(value, metric.threshold));
                MetricResult {
                    metric_id: metric.id.clone(),
                    actual,
                    op: metric.op,
                    threshold: metric.threshold,
                    weight: metric.weight,
                    required: metric.required,
                    passed,
                }
            })
            .collect();

        let total_weight: f64 = metric_results.iter().map(|r| r.weight).sum();
        let passed_weight: f64 = metric_results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.weight)
            .sum();
        // A rubric with no weighted metrics has nothing to fail on
        let score = if total_weight > 0.0 {
            (100.0 * passed_weight / total_weight).round() as u32
        } else {
            100
        };

        let required_failed: Vec<&MetricResult> = metric_results
            .iter()
            .filter(|r| r.required && !r.passed)
            .collect();

        let status = if !required_failed.is_empty()
            || !missing_artifacts.is_empty()
            || score < self.minimum_score
        {
            GateStatus::Fail
        } else if score < self.minimum_score + 10 {
            GateStatus::Warn
        } else {
            GateStatus::Pass
        };

        let mut reasons = Vec::new();
        let mut required_actions = Vec::new();
        let mut recommendations = Vec::new();
        let mut issue_tags = Vec::new();

        for artifact_type in &missing_artifacts {
            reasons.push(format!("required artifact '{artifact_type}' not presented"));
            required_actions.push(format!("provide artifact of type '{artifact_type}'"));
            recommendations.push(format!("generate {artifact_type}"));
        }
        if !missing_artifacts.is_empty() {
            issue_tags.push("missing-artifacts".to_string());
        }

        for result in &metric_results {
            if result.passed {
                // Marginal pass: within 10% of the threshold. Equality
                // metrics (booleans) always sit on the threshold; skip them.
                let ordered = !matches!(result.op, ComparisonOp::Eq | ComparisonOp::Ne);
                if let (true, Some(actual)) = (ordered, result.actual) {
                    let margin = (actual - result.threshold).abs();
                    let band = (result.threshold.abs() * 0.10).max(f64::EPSILON);
                    if margin <= band {
                        recommendations.push(format!(
                            "metric '{}' passes with little margin; consider improving for robustness",
                            result.metric_id
                        ));
                    }
                }
                continue;
            }

            issue_tags.push(result.metric_id.clone());
            match result.actual {
                Some(actual) => {
                    reasons.push(format!(
                        "metric '{}': observed {:.3}, needs {} {}",
                        result.metric_id,
                        actual,
                        result.op.as_str(),
                        result.threshold
                    ));
                    let gap_pct = if result.threshold.abs() > f64::EPSILON {
                        ((result.threshold - actual).abs() / result.threshold.abs()) * 100.0
                    } else {
                        (result.threshold - actual).abs() * 100.0
                    };
                    recommendations.push(format!(
                        "metric '{}' is {:.1}% away from its threshold",
                        result.metric_id, gap_pct
                    ));
                }
                None => {
                    reasons.push(format!("metric '{}' was not observed", result.metric_id));
                    recommendations.push(format!("report a reading for '{}'", result.metric_id));
                }
            }
            if result.required {
                required_actions.push(format!(
                    "bring required metric '{}' to {} {}",
                    result.metric_id,
                    result.op.as_str(),
                    result.threshold
                ));
            }
        }

        if status == GateStatus::Fail && score < self.minimum_score && required_failed.is_empty() {
            reasons.push(format!(
                "weighted score {score} below minimum {}",
                self.minimum_score
            ));
        }

        let decision = if !missing_artifacts.is_empty() {
            GateDecision::Escalate
        } else if status == GateStatus::Fail {
            GateDecision::Fail
        } else {
            GateDecision::Pass
        };

        let next_steps = match status {
            GateStatus::Pass => vec!["advance to the next phase".to_string()],
            GateStatus::Warn => vec![
                "advance to the next phase".to_string(),
                "schedule the recommended improvements".to_string(),
            ],
            GateStatus::Fail => vec!["apply remediation and re-evaluate the gate".to_string()],
        };

        GateEvaluation {
            gate: self.name.clone(),
            status,
            score,
            evidence: EvidencePack {
                required_artifacts: self.required_artifact_types.clone(),
                presented_artifacts: artifacts.to_vec(),
                missing_artifacts,
                rubric_scores: metric_results,
                tool_provenance: Vec::new(),
                test_reports: Vec::new(),
                approvals: Vec::new(),
                evaluated_at: Utc::now(),
            },
            decision,
            reasons,
            required_actions,
            next_steps,
            recommendations,
            issue_tags,
        }
    }
}
