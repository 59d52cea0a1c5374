//! Shipwright-Toolkit: Tool Descriptors & Invocation Contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::CapabilityClass;

/// Toolkit errors.
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("unknown capability class: '{0}'")]
    UnknownCapability(String),

    #[error("tool '{0}' not found in registry")]
    ToolNotFound(String),

    #[error("tool '{tool_id}' invocation failed: {reason}")]
    InvocationFailed { tool_id: String, reason: String },
}

/// Estimated or actual cost of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub usd: f64,
    pub tokens: u64,
}

impl CostEstimate {
    pub fn new(usd: f64, tokens: u64) -> Self {
        Self { usd, tokens }
    }
}

/// A registered tool: identity, capability, estimators, handling attributes.
/// The descriptor is all the analyzer needs; execution lives behind
/// [`ToolInvoker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Dotted id; the second segment is the fallback-ladder category
    /// (e.g. `tool.qa.e2e-runner`)
    pub id: String,
    pub capability: CapabilityClass,
    pub version: String,
    pub estimated_cost: CostEstimate,
    pub estimated_latency_ms: u64,
    /// Tool ingests or emits personally-identifiable information
    pub handles_pii: bool,
    /// Invocation needs a human approval first
    pub requires_approval: bool,
}

impl ToolSpec {
    pub fn new(id: impl Into<String>, capability: CapabilityClass) -> Self {
        Self {
            id: id.into(),
            capability,
            version: "1.0.0".to_string(),
            estimated_cost: CostEstimate::default(),
            estimated_latency_ms: 1_000,
            handles_pii: false,
            requires_approval: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_cost(mut self, usd: f64, tokens: u64) -> Self {
        self.estimated_cost = CostEstimate::new(usd, tokens);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.estimated_latency_ms = latency_ms;
        self
    }

    pub fn with_pii(mut self, handles_pii: bool) -> Self {
        self.handles_pii = handles_pii;
        self
    }

    pub fn with_approval_required(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Opaque output envelope
    pub output: serde_json::Value,
    /// Actual cost incurred
    pub cost: CostEstimate,
    pub latency_ms: u64,
}

/// Executes tools. Implementations live outside the core (sandboxes, HTTP
/// sidecars, local binaries); the control plane only sees this contract.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        spec: &ToolSpec,
        input: &serde_json::Value,
    ) -> Result<ToolOutput, ToolkitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let spec = ToolSpec::new("tool.qa.e2e-runner", CapabilityClass::QaE2e);
        assert_eq!(spec.version, "1.0.0");
        assert!(!spec.handles_pii);
        assert_eq!(spec.estimated_cost, CostEstimate::default());
    }

    #[test]
    fn test_builder_overrides() {
        let spec = ToolSpec::new("tool.intake.scrubber", CapabilityClass::IntakeNormalizer)
            .with_cost(0.25, 4_000)
            .with_pii(true)
            .with_approval_required(true);
        assert!(spec.handles_pii);
        assert!(spec.requires_approval);
        assert!((spec.estimated_cost.usd - 0.25).abs() < f64::EPSILON);
    }
}
