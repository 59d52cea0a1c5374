//! Shipwright-Conductor: Pipeline Configuration
//!
//! YAML-loadable overrides for the control plane: phase table entries, gate
//! rubrics, retry policies, analyzer thresholds, and scaling policies. The
//! config deserializes into the same structs the runtime uses; invalid
//! entries are rejected at load time with the offending entry named.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use shipwright_gatekeeper::GateRubric;
use shipwright_scaler::ScalingPolicy;
use shipwright_sentinel::RetryPolicyTable;
use shipwright_toolkit::AnalyzerConfig;

use crate::error::ConductorError;
use crate::phase::{PhaseConfig, PhaseTable};

/// The full pipeline configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Phase table overrides; phases not listed keep their defaults
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
    /// Gate rubrics keyed by gate class name
    #[serde(default)]
    pub gates: HashMap<String, GateRubric>,
    /// Retry policy table override
    #[serde(default)]
    pub retry: Option<RetryPolicyTable>,
    /// VoI analyzer configuration override
    #[serde(default)]
    pub analyzer: Option<AnalyzerConfig>,
    /// Scaling policies to register with the autoscaler
    #[serde(default)]
    pub scaling: Vec<ScalingPolicy>,
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConductorError> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConductorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every entry; the first offender is named in the error.
    pub fn validate(&self) -> Result<(), ConductorError> {
        for config in &self.phases {
            if config.budget.usd <= 0.0 || config.budget.tokens == 0 {
                return Err(ConductorError::InvalidConfig(format!(
                    "phase {} has a non-positive budget",
                    config.phase
                )));
            }
            if config.max_concurrency == 0 {
                return Err(ConductorError::InvalidConfig(format!(
                    "phase {} has zero max_concurrency",
                    config.phase
                )));
            }
            if let Some(gate) = &config.gate {
                if !self.gates.contains_key(gate) {
                    return Err(ConductorError::InvalidConfig(format!(
                        "phase {} references gate '{gate}' which is not defined",
                        config.phase
                    )));
                }
                if config.max_gate_retries == 0 {
                    return Err(ConductorError::InvalidConfig(format!(
                        "phase {} has a gate but zero max_gate_retries",
                        config.phase
                    )));
                }
            }
        }

        for (name, rubric) in &self.gates {
            if rubric.minimum_score > 100 {
                return Err(ConductorError::InvalidConfig(format!(
                    "gate '{name}' minimum_score exceeds 100"
                )));
            }
            for metric in &rubric.metrics {
                if !(0.0..=1.0).contains(&metric.weight) {
                    return Err(ConductorError::InvalidConfig(format!(
                        "gate '{name}' metric '{}' weight outside [0, 1]",
                        metric.id
                    )));
                }
            }
        }

        for policy in &self.scaling {
            policy
                .validate()
                .map_err(|e| ConductorError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    /// The standard phase table with this config's overrides applied.
    pub fn phase_table(&self) -> PhaseTable {
        let mut table = PhaseTable::standard();
        for config in &self.phases {
            table = table.with_config(config.clone());
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    const SAMPLE: &str = r#"
phases:
  - phase: QA
    budget: { usd: 25.0, tokens: 2000000 }
    min_agents: 3
    max_concurrency: 8
    gate: qa_gate
    max_gate_retries: 4
    auto_fix_on_gate_fail: true
gates:
  qa_gate:
    name: qa_gate
    minimum_score: 80
    required_artifact_types: [test_report]
    metrics:
      - id: coverage_pct
        kind: percentage
        op: ">="
        threshold: 85
        weight: 0.6
        required: true
      - id: grounding_score
        kind: numeric
        op: ">="
        threshold: 0.9
        weight: 0.4
        required: false
scaling:
  - policy_id: qa-cpu
    shard_id: shard-a
    phase: QA
    resource_class: cpu
    min_workers: 1
    max_workers: 6
    target_queue_depth: 10
    target_cpu_utilization: 0.75
    target_memory_utilization: 0.8
    target_task_latency_ms: 30000
    scale_up_increment: 2
    scale_down_decrement: 1
    scale_up_cooldown_ms: 60000
    scale_down_cooldown_ms: 300000
    predictive_scaling: true
    graceful_shutdown: true
"#;

    #[test]
    fn test_sample_config_loads() {
        let config = PipelineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.phases.len(), 1);
        assert_eq!(config.gates["qa_gate"].metrics.len(), 2);
        assert_eq!(config.scaling[0].max_workers, 6);

        let table = config.phase_table();
        assert_eq!(table.get(Phase::Qa).max_gate_retries, 4);
        // Unlisted phases keep their defaults
        assert_eq!(table.get(Phase::Intake).max_gate_retries, 3);
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let yaml = r#"
phases:
  - phase: SHIP_IT
    budget: { usd: 1.0, tokens: 1000 }
    min_agents: 1
    max_concurrency: 1
    max_gate_retries: 1
    auto_fix_on_gate_fail: false
"#;
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(ConductorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_undefined_gate_reference_rejected() {
        let yaml = r#"
phases:
  - phase: QA
    budget: { usd: 1.0, tokens: 1000 }
    min_agents: 1
    max_concurrency: 1
    gate: ghost_gate
    max_gate_retries: 1
    auto_fix_on_gate_fail: false
"#;
        let err = PipelineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("ghost_gate"));
    }

    #[test]
    fn test_invalid_scaling_bounds_rejected() {
        let yaml = r#"
scaling:
  - policy_id: broken
    shard_id: shard-a
    phase: QA
    resource_class: cpu
    min_workers: 9
    max_workers: 3
    target_queue_depth: 10
    target_cpu_utilization: 0.75
    target_memory_utilization: 0.8
    target_task_latency_ms: 30000
    scale_up_increment: 2
    scale_down_decrement: 1
    scale_up_cooldown_ms: 60000
    scale_down_cooldown_ms: 300000
    predictive_scaling: false
    graceful_shutdown: true
"#;
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(ConductorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_metric_weight_rejected() {
        let yaml = r#"
gates:
  g:
    name: g
    minimum_score: 50
    required_artifact_types: []
    metrics:
      - id: m
        kind: numeric
        op: ">="
        threshold: 1
        weight: 3.0
        required: false
"#;
        let err = PipelineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("weight"));
    }

    #[test]
    fn test_empty_config_is_fine() {
        let config = PipelineConfig::from_yaml_str("{}").unwrap();
        assert!(config.phases.is_empty());
        assert!(config.retry.is_none());
    }
}
