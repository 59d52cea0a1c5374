//! Shipwright-Scaler: Scaling Policies

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scaler errors.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("scaling policy '{policy_id}' invalid: {reason}")]
    InvalidPolicy { policy_id: String, reason: String },

    #[error("scaling policy '{0}' not registered")]
    PolicyNotFound(String),
}

/// Worker resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Cpu,
    Gpu,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

/// Scaling policy for one (shard, phase, resource-class) pool.
///
/// Utilization targets are fractions in (0, 1]; latency is milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub policy_id: String,
    pub shard_id: String,
    pub phase: String,
    pub resource_class: ResourceClass,

    pub min_workers: u32,
    pub max_workers: u32,

    pub target_queue_depth: u32,
    pub target_cpu_utilization: f64,
    pub target_memory_utilization: f64,
    pub target_task_latency_ms: u64,

    pub scale_up_increment: u32,
    pub scale_down_decrement: u32,

    pub scale_up_cooldown_ms: u64,
    pub scale_down_cooldown_ms: u64,

    pub predictive_scaling: bool,
    pub graceful_shutdown: bool,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ScalingPolicy {
    pub fn new(
        policy_id: impl Into<String>,
        shard_id: impl Into<String>,
        phase: impl Into<String>,
        resource_class: ResourceClass,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            shard_id: shard_id.into(),
            phase: phase.into(),
            resource_class,
            min_workers: 1,
            max_workers: 10,
            target_queue_depth: 10,
            target_cpu_utilization: 0.75,
            target_memory_utilization: 0.80,
            target_task_latency_ms: 30_000,
            scale_up_increment: 2,
            scale_down_decrement: 1,
            scale_up_cooldown_ms: 60_000,
            scale_down_cooldown_ms: 300_000,
            predictive_scaling: false,
            graceful_shutdown: true,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_bounds(mut self, min_workers: u32, max_workers: u32) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    pub fn with_target_queue_depth(mut self, depth: u32) -> Self {
        self.target_queue_depth = depth;
        self
    }

    pub fn with_steps(mut self, up: u32, down: u32) -> Self {
        self.scale_up_increment = up;
        self.scale_down_decrement = down;
        self
    }

    pub fn with_cooldowns(mut self, up_ms: u64, down_ms: u64) -> Self {
        self.scale_up_cooldown_ms = up_ms;
        self.scale_down_cooldown_ms = down_ms;
        self
    }

    pub fn with_predictive_scaling(mut self, enabled: bool) -> Self {
        self.predictive_scaling = enabled;
        self
    }

    pub fn with_graceful_shutdown(mut self, enabled: bool) -> Self {
        self.graceful_shutdown = enabled;
        self
    }

    /// Validate the invariants: `min <= max`, positive thresholds, nonzero
    /// step sizes.
    pub fn validate(&self) -> Result<(), ScalerError> {
        let fail = |reason: &str| {
            Err(ScalerError::InvalidPolicy {
                policy_id: self.policy_id.clone(),
                reason: reason.to_string(),
            })
        };
        if self.min_workers > self.max_workers {
            return fail("min_workers exceeds max_workers");
        }
        if self.target_queue_depth == 0 {
            return fail("target_queue_depth must be positive");
        }
        if self.target_cpu_utilization <= 0.0 || self.target_cpu_utilization > 1.0 {
            return fail("target_cpu_utilization must be in (0, 1]");
        }
        if self.target_memory_utilization <= 0.0 || self.target_memory_utilization > 1.0 {
            return fail("target_memory_utilization must be in (0, 1]");
        }
        if self.target_task_latency_ms == 0 {
            return fail("target_task_latency_ms must be positive");
        }
        if self.scale_up_increment == 0 || self.scale_down_decrement == 0 {
            return fail("step sizes must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = ScalingPolicy::new("p1", "shard-a", "BUILD", ResourceClass::Cpu);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let policy =
            ScalingPolicy::new("p1", "shard-a", "BUILD", ResourceClass::Cpu).with_bounds(5, 2);
        assert!(matches!(
            policy.validate(),
            Err(ScalerError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut policy = ScalingPolicy::new("p1", "shard-a", "BUILD", ResourceClass::Cpu);
        policy.target_queue_depth = 0;
        assert!(policy.validate().is_err());

        let mut policy = ScalingPolicy::new("p2", "shard-a", "BUILD", ResourceClass::Gpu);
        policy.target_cpu_utilization = 0.0;
        assert!(policy.validate().is_err());
    }
}
