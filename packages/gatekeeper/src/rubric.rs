//! Shipwright-Gatekeeper: Gate Rubrics
//!
//! The data model of a gate. Rubrics deserialize straight from pipeline
//! config, so a new gate is a config change, not a code change.

use serde::{Deserialize, Serialize};

/// Value type of a metric observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Numeric,
    /// Observed as 1.0 (true) / 0.0 (false)
    Boolean,
    /// Observed in [0, 100]
    Percentage,
    Count,
}

/// Comparison applied as `op(actual, threshold)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Apply the comparison.
    pub fn apply(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Self::Eq => actual == threshold,
            Self::Ne => actual != threshold,
            Self::Lt => actual < threshold,
            Self::Le => actual <= threshold,
            Self::Gt => actual > threshold,
            Self::Ge => actual >= threshold,
        }
    }
}

/// One rubric metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    /// Stable id; also the key observations are reported under
    pub id: String,
    pub kind: MetricKind,
    pub op: ComparisonOp,
    pub threshold: f64,
    /// Weight in [0, 1]; share of the gate score
    pub weight: f64,
    /// A required metric failing fails the gate regardless of score
    pub required: bool,
}

impl Metric {
    pub fn new(id: impl Into<String>, kind: MetricKind, op: ComparisonOp, threshold: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            op,
            threshold,
            weight: 1.0,
            required: false,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A gate: metrics, a minimum overall score, and required artifact types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRubric {
    pub name: String,
    pub metrics: Vec<Metric>,
    /// Minimum weighted score (0-100) for a pass
    pub minimum_score: u32,
    pub required_artifact_types: Vec<String>,
}

impl GateRubric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: Vec::new(),
            minimum_score: 70,
            required_artifact_types: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_minimum_score(mut self, minimum_score: u32) -> Self {
        self.minimum_score = minimum_score.min(100);
        self
    }

    pub fn with_required_artifact(mut self, artifact_type: impl Into<String>) -> Self {
        self.required_artifact_types.push(artifact_type.into());
        self
    }
}
