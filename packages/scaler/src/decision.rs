//! Shipwright-Scaler: Scaling Decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::PoolMetrics;

/// What the autoscaler decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoChange,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::NoChange => "no_change",
        }
    }
}

/// Decision execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One persisted scaling decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub decision_id: Uuid,
    pub policy_id: String,
    pub shard_id: String,
    pub phase: String,
    pub action: ScalingAction,
    pub current_workers: u32,
    pub target_workers: u32,
    pub reasons: Vec<String>,
    /// The metrics sample the decision was made on
    pub metrics: PoolMetrics,
    pub status: DecisionStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ScalingDecision {
    pub fn new(
        policy_id: impl Into<String>,
        shard_id: impl Into<String>,
        phase: impl Into<String>,
        action: ScalingAction,
        current_workers: u32,
        target_workers: u32,
        metrics: PoolMetrics,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            policy_id: policy_id.into(),
            shard_id: shard_id.into(),
            phase: phase.into(),
            action,
            current_workers,
            target_workers,
            reasons: Vec::new(),
            metrics,
            status: DecisionStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            error_message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons.extend(reasons);
        self
    }
}
