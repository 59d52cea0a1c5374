//! Shipwright-Toolkit: Value-of-Information Analyzer
//!
//! Decides whether an agent should consult a tool at all, and if so which
//! one. The benefit of a tool is its expected error reduction times the
//! utility of the task; the price is cost, latency, and risk. A tool is
//! selected only when the best net score clears the invocation threshold
//! and the agent is not already confident enough on its own.
//!
//! Risk contributions are additive (PII 0.3, approval 0.2, budget overrun
//! 0.5) and saturate at 1.0, so a tool that trips several flags cannot be
//! penalized past the clamp.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use shipwright_recorder::{DecisionRecord, Recorder};

use crate::capability::CapabilityClass;
use crate::registry::ToolRegistry;
use crate::tool::ToolSpec;

/// Remaining spend the analyzer may authorize against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub remaining_usd: f64,
    pub remaining_tokens: u64,
}

/// PII egress policy for the current phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PiiPolicy {
    pub allow_pii_egress: bool,
    pub requires_approval: bool,
}

/// Analyzer thresholds and constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Agent confidence at or above which no tool is consulted
    pub min_confidence_no_tool: f64,
    /// Minimum net VoI score that justifies an invocation
    pub min_score_to_invoke: f64,
    pub budget: Option<BudgetSnapshot>,
    /// When present, only these capabilities may use tools
    pub allowlist: Option<Vec<CapabilityClass>>,
    /// These capabilities may never use tools
    pub denylist: Vec<CapabilityClass>,
    pub pii_policy: Option<PiiPolicy>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_confidence_no_tool: 0.78,
            min_score_to_invoke: 0.22,
            budget: None,
            allowlist: None,
            denylist: Vec::new(),
            pii_policy: None,
        }
    }
}

/// Scored candidate tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiScore {
    pub tool_id: String,
    pub error_reduction: f64,
    pub utility: f64,
    pub cost_penalty: f64,
    pub latency_penalty: f64,
    pub risk_penalty: f64,
    /// `utility * error_reduction - (cost + latency + risk)`
    pub final_score: f64,
}

/// Outcome of an analysis.
#[derive(Debug, Clone)]
pub struct ToolAnalysis {
    pub use_tools: bool,
    pub selected: Option<Arc<ToolSpec>>,
    pub selected_score: Option<VoiScore>,
    /// Runner-up scores kept as context for the caller
    pub alternatives: Vec<VoiScore>,
    pub reason: String,
}

/// What the agent is asking for.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub run_id: String,
    pub phase: String,
    pub capability: CapabilityClass,
    /// Agent's confidence it can answer without a tool, in [0, 1]
    pub no_tool_confidence: f64,
    /// Utility of the task at hand, in [0, 1]
    pub utility: f64,
    /// Opaque agent input; passed through for provenance
    pub input: serde_json::Value,
}

/// Value-of-Information analyzer over a tool registry.
pub struct Analyzer {
    registry: Arc<ToolRegistry>,
    recorder: Option<Arc<Recorder>>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(registry: Arc<ToolRegistry>, config: AnalyzerConfig) -> Self {
        Self {
            registry,
            recorder: None,
            config,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Run the decision procedure. A decision record is written either way.
    pub async fn analyze(&self, request: &AnalysisRequest) -> ToolAnalysis {
        let analysis = self.decide(request);
        self.record(request, &analysis).await;
        analysis
    }

    fn decide(&self, request: &AnalysisRequest) -> ToolAnalysis {
        if request.no_tool_confidence >= self.config.min_confidence_no_tool {
            return ToolAnalysis {
                use_tools: false,
                selected: None,
                selected_score: None,
                alternatives: Vec::new(),
                reason: format!(
                    "agent confidence {:.2} meets threshold {:.2}; no tool needed",
                    request.no_tool_confidence, self.config.min_confidence_no_tool
                ),
            };
        }

        // Back-pressure: an exhausted budget refuses tools outright
        if let Some(budget) = &self.config.budget {
            if budget.remaining_usd <= 0.0 {
                return ToolAnalysis {
                    use_tools: false,
                    selected: None,
                    selected_score: None,
                    alternatives: Vec::new(),
                    reason: "budget exhausted; tool invocation refused".to_string(),
                };
            }
        }

        let eligible = self.eligible_tools(request.capability);
        if eligible.is_empty() {
            return ToolAnalysis {
                use_tools: false,
                selected: None,
                selected_score: None,
                alternatives: Vec::new(),
                reason: format!("no eligible tools for capability '{}'", request.capability),
            };
        }

        let mut scored: Vec<(Arc<ToolSpec>, VoiScore)> = eligible
            .into_iter()
            .map(|tool| {
                let score = self.score_tool(&tool, request);
                (tool, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.final_score
                .partial_cmp(&a.1.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (best_tool, best_score) = scored[0].clone();
        let alternatives: Vec<VoiScore> =
            scored.iter().skip(1).take(3).map(|(_, s)| s.clone()).collect();

        if best_score.final_score >= self.config.min_score_to_invoke {
            ToolAnalysis {
                use_tools: true,
                reason: format!(
                    "tool '{}' scores {:.3} >= {:.3}",
                    best_tool.id, best_score.final_score, self.config.min_score_to_invoke
                ),
                selected: Some(best_tool),
                selected_score: Some(best_score),
                alternatives,
            }
        } else {
            ToolAnalysis {
                use_tools: false,
                selected: None,
                reason: format!(
                    "best tool '{}' scores {:.3} below invocation threshold {:.3}",
                    best_tool.id, best_score.final_score, self.config.min_score_to_invoke
                ),
                selected_score: Some(best_score),
                alternatives,
            }
        }
    }

    fn eligible_tools(&self, capability: CapabilityClass) -> Vec<Arc<ToolSpec>> {
        if self.config.denylist.contains(&capability) {
            return Vec::new();
        }
        if let Some(allowlist) = &self.config.allowlist {
            if !allowlist.contains(&capability) {
                return Vec::new();
            }
        }
        self.registry.get_by_capability(capability)
    }

    fn score_tool(&self, tool: &ToolSpec, request: &AnalysisRequest) -> VoiScore {
        let error_reduction = (0.95 - request.no_tool_confidence).max(0.0);
        let cost_penalty = tool.estimated_cost.usd.min(1.0);
        let latency_penalty = (tool.estimated_latency_ms as f64 / 10_000.0).min(1.0);

        let pii_violation = tool.handles_pii
            && self
                .config
                .pii_policy
                .is_some_and(|p| !p.allow_pii_egress);
        let needs_approval = tool.requires_approval
            || (tool.handles_pii && self.config.pii_policy.is_some_and(|p| p.requires_approval));
        let budget_overrun = self.config.budget.is_some_and(|b| {
            tool.estimated_cost.usd > b.remaining_usd || tool.estimated_cost.tokens > b.remaining_tokens
        });

        let flag = |on: bool| -> f64 { if on { 1.0 } else { 0.0 } };
        let risk_penalty = (0.3 * flag(pii_violation)
            + 0.2 * flag(needs_approval)
            + 0.5 * flag(budget_overrun))
        .min(1.0);

        let final_score =
            request.utility * error_reduction - (cost_penalty + latency_penalty + risk_penalty);

        VoiScore {
            tool_id: tool.id.clone(),
            error_reduction,
            utility: request.utility,
            cost_penalty,
            latency_penalty,
            risk_penalty,
            final_score,
        }
    }

    async fn record(&self, request: &AnalysisRequest, analysis: &ToolAnalysis) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let decision = if analysis.use_tools {
            format!(
                "use_tools=true tool={}",
                analysis.selected.as_ref().map_or("?", |t| t.id.as_str())
            )
        } else {
            "use_tools=false".to_string()
        };
        let context = serde_json::json!({
            "capability": request.capability,
            "no_tool_confidence": request.no_tool_confidence,
            "utility": request.utility,
            "selected_score": analysis.selected_score,
            "alternatives": analysis.alternatives,
        });
        recorder
            .record_decision(
                DecisionRecord::new(&request.run_id, &request.phase, "voi_analyzer", decision)
                    .with_reason(analysis.reason.clone())
                    .with_context(context),
            )
            .await;
    }
}
