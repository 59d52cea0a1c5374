//! Shipwright-Conductor: Loop-Until-Pass Driver
//!
//! Execute the phase body, evaluate its gate, and if it fails, apply the
//! auto-fix strategies matching the failing issues and try again, up to the
//! attempt cap. Strategies for distinct issues run concurrently; one failing
//! strategy never aborts the others. The cap is hard: an exhausted loop is
//! fatal for the phase unless the waiver manager holds an active waiver
//! covering every outstanding violation (or a blanket gate waiver).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shipwright_gatekeeper::{
    ArtifactRef, GateDecision, GateEvaluation, GateRubric, MetricReadings, Waiver, WaiverManager,
};
use shipwright_recorder::{DecisionRecord, Recorder, ScoreRecord};

use crate::error::ConductorError;
use crate::phase::Phase;

/// What a phase body executes against.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub run_id: String,
    pub phase: Phase,
    pub shard_id: String,
    /// Opaque run context
    pub context: HashMap<String, String>,
}

/// Output of one phase body execution: the artifacts it produced, the metric
/// readings its gate will judge, and what it cost.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutput {
    pub artifacts: Vec<ArtifactRef>,
    pub readings: MetricReadings,
    pub cost_usd: f64,
    pub cost_tokens: u64,
    /// Opaque result envelope
    pub output: serde_json::Value,
}

/// The phase body. Implementations are the agent side of the system; the
/// core only sees this contract.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Actor name used in supervision and audit records.
    fn actor(&self) -> &str {
        "phase-agent"
    }

    /// Execute the phase body. `attempt` is 1-indexed across gate retries.
    async fn execute(&self, ctx: &PhaseContext, attempt: u32)
        -> Result<PhaseOutput, ConductorError>;
}

/// Evaluates the gate for a phase output.
#[async_trait]
pub trait GateEvaluator: Send + Sync {
    async fn evaluate(&self, ctx: &PhaseContext, output: &PhaseOutput) -> GateEvaluation;
}

/// The standard evaluator: a rubric applied to the output's artifacts and
/// readings. Gates differ only in rubric data.
pub struct RubricGateEvaluator {
    rubric: GateRubric,
}

impl RubricGateEvaluator {
    pub fn new(rubric: GateRubric) -> Self {
        Self { rubric }
    }
}

#[async_trait]
impl GateEvaluator for RubricGateEvaluator {
    async fn evaluate(&self, _ctx: &PhaseContext, output: &PhaseOutput) -> GateEvaluation {
        self.rubric.evaluate(&output.artifacts, &output.readings)
    }
}

/// Remediation strategies, selected per failing issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    /// Re-run question-answer validation to restore grounding
    RerunQav,
    /// Dispatch the agents whose coverage is missing
    AddMissingAgents,
    /// Re-run the security scan after patching
    RerunSecurity,
    /// Tighten validation to flush contradictions and ambiguity
    StricterValidation,
    /// Shrink the work scope and retry
    ReduceScope,
    /// No automated remedy; a human decides
    ManualIntervention,
}

impl FixStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RerunQav => "rerun_qav",
            Self::AddMissingAgents => "add_missing_agents",
            Self::RerunSecurity => "rerun_security",
            Self::StricterValidation => "stricter_validation",
            Self::ReduceScope => "reduce_scope",
            Self::ManualIntervention => "manual_intervention",
        }
    }

    /// Map an issue tag to its strategy. Matching is by substring so metric
    /// ids like `grounding_score` or `cve_count` land on the right remedy.
    pub fn for_issue(issue: &str) -> FixStrategy {
        let lower = issue.to_lowercase();
        if lower.contains("grounding") {
            Self::RerunQav
        } else if lower.contains("coverage") || lower.contains("missing-agents") {
            Self::AddMissingAgents
        } else if lower.contains("security") || lower.contains("cve") || lower.contains("vulnerab")
        {
            Self::RerunSecurity
        } else if lower.contains("contradiction") || lower.contains("ambiguity") {
            Self::StricterValidation
        } else if lower.contains("scope-too-large") || lower.contains("scope_too_large") {
            Self::ReduceScope
        } else {
            Self::ManualIntervention
        }
    }
}

/// Applies a fix strategy. Implementations dispatch repair agents, re-queue
/// scans, shrink scopes; the driver only cares that the next iteration
/// re-evaluates.
#[async_trait]
pub trait AutoFixer: Send + Sync {
    async fn apply(
        &self,
        ctx: &PhaseContext,
        strategy: FixStrategy,
        issue: &str,
    ) -> Result<(), ConductorError>;
}

/// Fixer that only logs. Useful where the executor itself improves on retry.
pub struct NoopAutoFixer;

#[async_trait]
impl AutoFixer for NoopAutoFixer {
    async fn apply(
        &self,
        ctx: &PhaseContext,
        strategy: FixStrategy,
        issue: &str,
    ) -> Result<(), ConductorError> {
        tracing::info!(
            run_id = %ctx.run_id,
            phase = %ctx.phase,
            strategy = strategy.as_str(),
            issue = %issue,
            "Auto-fix noted (noop fixer)"
        );
        Ok(())
    }
}

/// Loop parameters.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub max_attempts: u32,
    pub enable_auto_fix: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            enable_auto_fix: true,
        }
    }
}

/// Successful (or waived) loop result.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub output: PhaseOutput,
    pub evaluation: GateEvaluation,
    pub attempts: u32,
    /// Waivers that let a failing evaluation through, empty on a clean pass
    pub waivers: Vec<Waiver>,
}

/// Execute-evaluate-fix until the gate passes or the cap is hit.
pub async fn execute_with_gate(
    executor: &dyn PhaseExecutor,
    evaluator: &dyn GateEvaluator,
    fixer: &dyn AutoFixer,
    waivers: Option<&WaiverManager>,
    recorder: Option<&Recorder>,
    ctx: &PhaseContext,
    options: LoopOptions,
) -> Result<LoopOutcome, ConductorError> {
    let max_attempts = options.max_attempts.max(1);
    let mut last: Option<(PhaseOutput, GateEvaluation)> = None;
    let mut attempts_used = 0;

    for attempt in 1..=max_attempts {
        attempts_used = attempt;
        let output = executor.execute(ctx, attempt).await?;
        let evaluation = evaluator.evaluate(ctx, &output).await;
        record_evaluation(recorder, ctx, &evaluation, attempt).await;

        if evaluation.passed() {
            tracing::info!(
                run_id = %ctx.run_id,
                phase = %ctx.phase,
                gate = %evaluation.gate,
                score = evaluation.score,
                attempt,
                "Gate passed"
            );
            return Ok(LoopOutcome {
                output,
                evaluation,
                attempts: attempt,
                waivers: Vec::new(),
            });
        }

        tracing::warn!(
            run_id = %ctx.run_id,
            phase = %ctx.phase,
            gate = %evaluation.gate,
            score = evaluation.score,
            attempt,
            issues = ?evaluation.issue_tags,
            "Gate failed"
        );

        // Structural failures skip remediation; nothing a strategy can
        // synthesize
        let structural = evaluation.decision == GateDecision::Escalate;

        if !structural && options.enable_auto_fix && attempt < max_attempts {
            apply_fixes(fixer, ctx, &evaluation).await;
        }
        let final_attempt = structural || attempt == max_attempts;
        last = Some((output, evaluation));
        if final_attempt {
            break;
        }
    }

    let (output, evaluation) = last.expect("at least one attempt ran");

    // Last resort: active waivers covering every outstanding violation
    if let Some(manager) = waivers {
        if let Some(granted) = covering_waivers(manager, ctx, &evaluation) {
            tracing::warn!(
                run_id = %ctx.run_id,
                phase = %ctx.phase,
                gate = %evaluation.gate,
                waivers = granted.len(),
                "Gate failure waived"
            );
            return Ok(LoopOutcome {
                attempts: attempts_used,
                output,
                evaluation,
                waivers: granted,
            });
        }
    }

    if evaluation.decision == GateDecision::Escalate {
        Err(ConductorError::GateEscalated {
            gate: evaluation.gate,
            reasons: evaluation.reasons,
        })
    } else {
        Err(ConductorError::GateRetriesExhausted {
            gate: evaluation.gate,
            attempts: attempts_used,
            score: evaluation.score,
            reasons: evaluation.reasons,
        })
    }
}

/// Run the strategy for each distinct failing issue concurrently; errors are
/// logged and isolated.
async fn apply_fixes(fixer: &dyn AutoFixer, ctx: &PhaseContext, evaluation: &GateEvaluation) {
    let fixes: Vec<(String, FixStrategy)> = evaluation
        .issue_tags
        .iter()
        .map(|issue| (issue.clone(), FixStrategy::for_issue(issue)))
        .collect();

    let results = futures::future::join_all(fixes.iter().map(|(issue, strategy)| async move {
        (issue, strategy, fixer.apply(ctx, *strategy, issue).await)
    }))
    .await;

    for (issue, strategy, result) in results {
        if let Err(e) = result {
            tracing::warn!(
                run_id = %ctx.run_id,
                phase = %ctx.phase,
                issue = %issue,
                strategy = strategy.as_str(),
                error = %e,
                "Auto-fix strategy failed; continuing with the rest"
            );
        }
    }
}

/// A blanket `gate:<name>` waiver covers everything; otherwise every failing
/// issue must hold its own active waiver.
fn covering_waivers(
    manager: &WaiverManager,
    ctx: &PhaseContext,
    evaluation: &GateEvaluation,
) -> Option<Vec<Waiver>> {
    let phase = ctx.phase.as_str();
    if let Some(blanket) =
        manager.check_waiver(&ctx.run_id, phase, &format!("gate:{}", evaluation.gate))
    {
        return Some(vec![blanket]);
    }
    if evaluation.issue_tags.is_empty() {
        return None;
    }
    let mut granted = Vec::new();
    for issue in &evaluation.issue_tags {
        granted.push(manager.check_waiver(&ctx.run_id, phase, issue)?);
    }
    Some(granted)
}

async fn record_evaluation(
    recorder: Option<&Recorder>,
    ctx: &PhaseContext,
    evaluation: &GateEvaluation,
    attempt: u32,
) {
    let Some(recorder) = recorder else { return };
    recorder
        .record_score(
            ScoreRecord::new(
                &ctx.run_id,
                ctx.phase.as_str(),
                &evaluation.gate,
                f64::from(evaluation.score),
                100.0,
            )
            .with_breakdown(serde_json::to_value(&evaluation.evidence.rubric_scores).unwrap_or_default()),
        )
        .await;
    recorder
        .record_decision(
            DecisionRecord::new(
                &ctx.run_id,
                ctx.phase.as_str(),
                "gatekeeper",
                format!("{:?}", evaluation.decision).to_lowercase(),
            )
            .with_context(serde_json::json!({
                "gate": evaluation.gate,
                "attempt": attempt,
                "status": evaluation.status,
                "score": evaluation.score,
                "reasons": evaluation.reasons,
            })),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shipwright_gatekeeper::{ComparisonOp, Metric, MetricKind, WaiverRequest};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> PhaseContext {
        PhaseContext {
            run_id: "run-1".to_string(),
            phase: Phase::Qa,
            shard_id: "shard-a".to_string(),
            context: HashMap::new(),
        }
    }

    fn grounding_rubric() -> GateRubric {
        GateRubric::new("qa_gate").with_minimum_score(0).with_metric(
            Metric::new("grounding_score", MetricKind::Numeric, ComparisonOp::Ge, 0.9).required(),
        )
    }

    /// Executor whose grounding improves on each attempt.
    struct ImprovingExecutor {
        scores: Vec<f64>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PhaseExecutor for ImprovingExecutor {
        async fn execute(
            &self,
            _ctx: &PhaseContext,
            _attempt: u32,
        ) -> Result<PhaseOutput, ConductorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let score = self.scores[n.min(self.scores.len() - 1)];
            let mut output = PhaseOutput::default();
            output.readings.insert("grounding_score".to_string(), score);
            Ok(output)
        }
    }

    struct RecordingFixer {
        applied: Mutex<Vec<(String, FixStrategy)>>,
    }

    #[async_trait]
    impl AutoFixer for RecordingFixer {
        async fn apply(
            &self,
            _ctx: &PhaseContext,
            strategy: FixStrategy,
            issue: &str,
        ) -> Result<(), ConductorError> {
            self.applied.lock().push((issue.to_string(), strategy));
            Ok(())
        }
    }

    #[test]
    fn test_issue_to_strategy_map() {
        assert_eq!(FixStrategy::for_issue("grounding_score"), FixStrategy::RerunQav);
        assert_eq!(FixStrategy::for_issue("low-grounding"), FixStrategy::RerunQav);
        assert_eq!(FixStrategy::for_issue("coverage_pct"), FixStrategy::AddMissingAgents);
        assert_eq!(FixStrategy::for_issue("missing-agents"), FixStrategy::AddMissingAgents);
        assert_eq!(FixStrategy::for_issue("cve_count"), FixStrategy::RerunSecurity);
        assert_eq!(FixStrategy::for_issue("vulnerability_scan"), FixStrategy::RerunSecurity);
        assert_eq!(FixStrategy::for_issue("ambiguity_index"), FixStrategy::StricterValidation);
        assert_eq!(FixStrategy::for_issue("scope-too-large"), FixStrategy::ReduceScope);
        assert_eq!(FixStrategy::for_issue("mystery"), FixStrategy::ManualIntervention);
    }

    #[tokio::test]
    async fn test_fail_then_fix_then_pass() {
        let executor = ImprovingExecutor {
            scores: vec![0.7, 0.92],
            calls: AtomicU32::new(0),
        };
        let evaluator = RubricGateEvaluator::new(grounding_rubric());
        let fixer = RecordingFixer {
            applied: Mutex::new(Vec::new()),
        };

        let outcome = execute_with_gate(
            &executor,
            &evaluator,
            &fixer,
            None,
            None,
            &ctx(),
            LoopOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.waivers.is_empty());
        let applied = fixer.applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0], ("grounding_score".to_string(), FixStrategy::RerunQav));
    }

    #[tokio::test]
    async fn test_cap_is_hard_without_waiver() {
        let executor = ImprovingExecutor {
            scores: vec![0.1],
            calls: AtomicU32::new(0),
        };
        let evaluator = RubricGateEvaluator::new(grounding_rubric());

        let err = execute_with_gate(
            &executor,
            &evaluator,
            &NoopAutoFixer,
            None,
            None,
            &ctx(),
            LoopOptions {
                max_attempts: 2,
                enable_auto_fix: true,
            },
        )
        .await
        .unwrap_err();

        match err {
            ConductorError::GateRetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_waiver_lets_exhausted_gate_through() {
        let executor = ImprovingExecutor {
            scores: vec![0.1],
            calls: AtomicU32::new(0),
        };
        let evaluator = RubricGateEvaluator::new(grounding_rubric());
        let waivers = WaiverManager::new();
        waivers
            .request_waiver(WaiverRequest {
                run_id: "run-1".to_string(),
                phase: "QA".to_string(),
                violation_type: "grounding_score".to_string(),
                violation_details: "known weak grounding on legacy corpus".to_string(),
                owner: "qa-lead".to_string(),
                justification: "accepted for the pilot cohort".to_string(),
                compensating_control: "manual spot checks".to_string(),
                requires_approval: false,
                expires_in_hours: None,
                metadata: serde_json::Value::Null,
            })
            .await;

        let outcome = execute_with_gate(
            &executor,
            &evaluator,
            &NoopAutoFixer,
            Some(&waivers),
            None,
            &ctx(),
            LoopOptions {
                max_attempts: 2,
                enable_auto_fix: false,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.waivers.len(), 1);
        assert_eq!(outcome.evaluation.status, shipwright_gatekeeper::GateStatus::Fail);
    }

    #[tokio::test]
    async fn test_partial_waiver_is_not_enough() {
        // Two failing required metrics, only one waived
        let rubric = GateRubric::new("qa_gate")
            .with_minimum_score(0)
            .with_metric(
                Metric::new("grounding_score", MetricKind::Numeric, ComparisonOp::Ge, 0.9)
                    .required(),
            )
            .with_metric(
                Metric::new("cve_count", MetricKind::Count, ComparisonOp::Le, 0.0).required(),
            );
        struct StaticExecutor;
        #[async_trait]
        impl PhaseExecutor for StaticExecutor {
            async fn execute(
                &self,
                _ctx: &PhaseContext,
                _attempt: u32,
            ) -> Result<PhaseOutput, ConductorError> {
                let mut output = PhaseOutput::default();
                output.readings.insert("grounding_score".to_string(), 0.1);
                output.readings.insert("cve_count".to_string(), 4.0);
                Ok(output)
            }
        }

        let waivers = WaiverManager::new();
        waivers
            .request_waiver(WaiverRequest {
                run_id: "run-1".to_string(),
                phase: "QA".to_string(),
                violation_type: "grounding_score".to_string(),
                violation_details: String::new(),
                owner: "qa-lead".to_string(),
                justification: String::new(),
                compensating_control: String::new(),
                requires_approval: false,
                expires_in_hours: None,
                metadata: serde_json::Value::Null,
            })
            .await;

        let err = execute_with_gate(
            &StaticExecutor,
            &RubricGateEvaluator::new(rubric),
            &NoopAutoFixer,
            Some(&waivers),
            None,
            &ctx(),
            LoopOptions {
                max_attempts: 1,
                enable_auto_fix: false,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConductorError::GateRetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn test_escalating_gate_skips_retries() {
        let rubric = GateRubric::new("qa_gate").with_required_artifact("test_report");
        let executor = ImprovingExecutor {
            scores: vec![0.95],
            calls: AtomicU32::new(0),
        };

        let err = execute_with_gate(
            &executor,
            &RubricGateEvaluator::new(rubric),
            &NoopAutoFixer,
            None,
            None,
            &ctx(),
            LoopOptions {
                max_attempts: 3,
                enable_auto_fix: true,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConductorError::GateEscalated { .. }));
        // No pointless re-executions of a structural failure
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evaluations_are_recorded() {
        use shipwright_recorder::InMemoryRecordStore;
        use std::sync::Arc;

        let recorder = Recorder::new(Arc::new(InMemoryRecordStore::new()));
        let executor = ImprovingExecutor {
            scores: vec![0.7, 0.92],
            calls: AtomicU32::new(0),
        };
        let evaluator = RubricGateEvaluator::new(grounding_rubric());

        execute_with_gate(
            &executor,
            &evaluator,
            &NoopAutoFixer,
            None,
            Some(&recorder),
            &ctx(),
            LoopOptions::default(),
        )
        .await
        .unwrap();

        let decisions = recorder.run_decisions("run-1").await.unwrap();
        assert_eq!(decisions.len(), 2); // one per evaluation
        let scores = recorder.run_scores("run-1").await.unwrap();
        assert_eq!(scores.len(), 2);
    }
}
