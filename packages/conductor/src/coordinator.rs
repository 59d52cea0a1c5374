//! Shipwright-Conductor: Phase Coordinator
//!
//! The facade that drives one run through the pipeline. Per phase it pulls
//! the phase config, refuses an already-exhausted budget, runs the body
//! under the sentinel supervisor, wraps gated phases in loop-until-pass,
//! charges the ledger, records the trail, and announces completion on the
//! bus. Terminal failures mark the run failed; its evidence stays in the
//! recorder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use shipwright_bus::{BusEvent, Dispatcher};
use shipwright_gatekeeper::{GateEvaluation, GateRubric, Waiver, WaiverManager};
use shipwright_recorder::{ArtifactRecord, DecisionRecord, LogEntry, Recorder, RecordStatus};
use shipwright_sentinel::{CallContext, SupervisedError, Supervisor};
use shipwright_toolkit::Analyzer;

use crate::budget::BudgetLedger;
use crate::error::ConductorError;
use crate::loopdrive::{
    execute_with_gate, AutoFixer, GateEvaluator, LoopOptions, NoopAutoFixer, PhaseContext,
    PhaseExecutor, PhaseOutput, RubricGateEvaluator,
};
use crate::phase::{Phase, PhaseTable};
use crate::run::{Run, RunStatus, RunStore};
use crate::task::TaskBoard;

/// Result of advancing a run by one phase.
#[derive(Debug, Clone)]
pub struct PhaseAdvance {
    pub phase: Phase,
    pub output: PhaseOutput,
    /// Present when the phase had a gate
    pub evaluation: Option<GateEvaluation>,
    /// Waivers that let a failing gate through
    pub waivers: Vec<Waiver>,
}

/// Composes supervisor, gates, waivers, budget, recorder, and bus into one
/// phase execution surface.
pub struct PhaseCoordinator {
    run_store: Arc<dyn RunStore>,
    recorder: Arc<Recorder>,
    dispatcher: Arc<dyn Dispatcher>,
    supervisor: Arc<Supervisor>,
    waivers: Arc<WaiverManager>,
    budget: Arc<BudgetLedger>,
    phase_table: PhaseTable,
    gates: HashMap<String, GateRubric>,
    fixer: Arc<dyn AutoFixer>,
    analyzer: Option<Arc<Analyzer>>,
    tasks: Arc<TaskBoard>,
}

impl PhaseCoordinator {
    pub fn new(
        run_store: Arc<dyn RunStore>,
        recorder: Arc<Recorder>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            run_store,
            recorder,
            dispatcher,
            supervisor: Arc::new(Supervisor::default()),
            waivers: Arc::new(WaiverManager::new()),
            budget: Arc::new(BudgetLedger::new()),
            phase_table: PhaseTable::standard(),
            gates: HashMap::new(),
            fixer: Arc::new(NoopAutoFixer),
            analyzer: None,
            tasks: Arc::new(TaskBoard::new()),
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_waivers(mut self, waivers: Arc<WaiverManager>) -> Self {
        self.waivers = waivers;
        self
    }

    pub fn with_budget(mut self, budget: Arc<BudgetLedger>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_phase_table(mut self, phase_table: PhaseTable) -> Self {
        self.phase_table = phase_table;
        self
    }

    /// Register the rubric backing a gate class name.
    pub fn with_gate(mut self, name: impl Into<String>, rubric: GateRubric) -> Self {
        self.gates.insert(name.into(), rubric);
        self
    }

    pub fn with_fixer(mut self, fixer: Arc<dyn AutoFixer>) -> Self {
        self.fixer = fixer;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// The waiver manager (for waiver CRUD surfaces).
    pub fn waivers(&self) -> &Arc<WaiverManager> {
        &self.waivers
    }

    /// The budget ledger (for analyzer budget snapshots).
    pub fn budget(&self) -> &Arc<BudgetLedger> {
        &self.budget
    }

    /// The VoI analyzer, when one is attached.
    pub fn analyzer(&self) -> Option<&Arc<Analyzer>> {
        self.analyzer.as_ref()
    }

    /// The task board tracking every phase execution.
    pub fn tasks(&self) -> &Arc<TaskBoard> {
        &self.tasks
    }

    /// Create and persist a new run.
    pub async fn start_run(
        &self,
        workflow_id: impl Into<String>,
        workflow_version: impl Into<String>,
        shard_id: impl Into<String>,
        context: HashMap<String, String>,
    ) -> Result<Run, ConductorError> {
        let mut run = Run::new(workflow_id, workflow_version, shard_id);
        run.context = context;
        tracing::info!(run_id = %run.id, workflow = %run.workflow_id, "Run created");
        self.run_store.insert(run.clone()).await?;
        self.recorder
            .record_step(LogEntry::new(
                &run.id,
                "-",
                "run_created",
                "coordinator",
                RecordStatus::Success,
            ))
            .await;
        Ok(run)
    }

    /// Execute the next phase of the run.
    pub async fn advance(
        &self,
        run_id: &str,
        executor: &dyn PhaseExecutor,
    ) -> Result<PhaseAdvance, ConductorError> {
        let mut run = self
            .run_store
            .get(run_id)
            .await?
            .ok_or_else(|| ConductorError::RunNotFound(run_id.to_string()))?;
        if !run.status.is_active() {
            return Err(ConductorError::RunNotActive {
                run_id: run.id,
                status: run.status.as_str().to_string(),
            });
        }

        let phase = match run.current_phase {
            None => Phase::first(),
            Some(current) => current.next().ok_or(ConductorError::RunNotActive {
                run_id: run.id.clone(),
                status: "completed".to_string(),
            })?,
        };
        let config = self.phase_table.get(phase).clone();

        if self.budget.is_exhausted(&run.id, phase, &config.budget) {
            self.fail_run(&mut run, phase, "budget exhausted before phase start")
                .await?;
            return Err(ConductorError::BudgetExhausted {
                run_id: run.id,
                phase: phase.as_str().to_string(),
            });
        }

        run.current_phase = Some(phase);
        run.status = RunStatus::Running;
        self.run_store.update(&run).await?;
        tracing::info!(run_id = %run.id, phase = %phase, "Phase started");

        let task_id = self.tasks.open(&run.id, phase);
        self.tasks.start(&task_id, None);

        let ctx = PhaseContext {
            run_id: run.id.clone(),
            phase,
            shard_id: run.shard_id.clone(),
            context: run.context.clone(),
        };
        let supervised = SupervisedExecutor {
            inner: executor,
            supervisor: &self.supervisor,
        };

        let started = std::time::Instant::now();
        let result = match &config.gate {
            Some(gate_name) => {
                let rubric = self.gates.get(gate_name).cloned().ok_or_else(|| {
                    ConductorError::InvalidConfig(format!(
                        "phase {phase} references unregistered gate '{gate_name}'"
                    ))
                })?;
                let evaluator = RubricGateEvaluator::new(rubric);
                execute_with_gate(
                    &supervised,
                    &evaluator as &dyn GateEvaluator,
                    self.fixer.as_ref(),
                    Some(self.waivers.as_ref()),
                    Some(self.recorder.as_ref()),
                    &ctx,
                    LoopOptions {
                        max_attempts: config.max_gate_retries.max(1),
                        enable_auto_fix: config.auto_fix_on_gate_fail,
                    },
                )
                .await
                .map(|outcome| PhaseAdvance {
                    phase,
                    output: outcome.output,
                    evaluation: Some(outcome.evaluation),
                    waivers: outcome.waivers,
                })
            }
            None => supervised.execute(&ctx, 1).await.map(|output| PhaseAdvance {
                phase,
                output,
                evaluation: None,
                waivers: Vec::new(),
            }),
        };

        match result {
            Ok(advance) => {
                self.tasks.succeed(&task_id);
                self.finish_phase(&mut run, &config.budget, &advance, started.elapsed())
                    .await?;
                Ok(advance)
            }
            Err(error) => {
                self.tasks.fail(&task_id);
                self.fail_run(&mut run, phase, &error.to_string()).await?;
                self.recorder
                    .record_decision(
                        DecisionRecord::new(&run.id, phase.as_str(), "coordinator", "abort_run")
                            .with_reason(error.to_string())
                            .with_context(serde_json::json!({
                                "kind": error.kind(),
                                "required_actions": error.required_actions(),
                            })),
                    )
                    .await;
                Err(error)
            }
        }
    }

    /// Advance until the pipeline completes.
    pub async fn run_to_completion(
        &self,
        run_id: &str,
        executor: &dyn PhaseExecutor,
    ) -> Result<Run, ConductorError> {
        loop {
            let advance = self.advance(run_id, executor).await?;
            if advance.phase.next().is_none() {
                break;
            }
        }
        self.run_store
            .get(run_id)
            .await?
            .ok_or_else(|| ConductorError::RunNotFound(run_id.to_string()))
    }

    async fn finish_phase(
        &self,
        run: &mut Run,
        cap: &crate::phase::PhaseBudget,
        advance: &PhaseAdvance,
        elapsed: std::time::Duration,
    ) -> Result<(), ConductorError> {
        let phase = advance.phase;
        let output = &advance.output;

        // Post-hoc overspend is recorded, not fatal; pre-phase refusal and
        // the analyzer's back-pressure are the enforcement points
        if let Err(e) = self.budget.charge(
            &run.id,
            phase,
            cap,
            output.cost_usd,
            output.cost_tokens,
        ) {
            tracing::warn!(run_id = %run.id, phase = %phase, error = %e, "Phase overspent its cap");
        }

        for artifact in &output.artifacts {
            self.recorder
                .record_artifact(ArtifactRecord::new(
                    &run.id,
                    phase.as_str(),
                    &artifact.artifact_type,
                    &artifact.id,
                    "phase-agent",
                ))
                .await;
        }

        let mut entry = LogEntry::new(
            &run.id,
            phase.as_str(),
            "phase_completed",
            "coordinator",
            RecordStatus::Success,
        )
        .with_cost(output.cost_usd, output.cost_tokens)
        .with_latency_ms(elapsed.as_millis() as u64);
        if let Some(evaluation) = &advance.evaluation {
            entry = entry
                .with_score(f64::from(evaluation.score))
                .with_gate(evaluation.gate.clone());
        }
        self.recorder.record_step(entry).await;

        self.dispatcher
            .publish(BusEvent::new(
                phase.completion_topic(),
                serde_json::json!({
                    "run_id": run.id,
                    "phase": phase.as_str(),
                    "waived": !advance.waivers.is_empty(),
                }),
            ))
            .await;

        if phase.next().is_none() {
            run.status = RunStatus::Completed;
            tracing::info!(run_id = %run.id, "Run completed");
        }
        run.current_phase = Some(phase);
        self.run_store.update(run).await
    }

    async fn fail_run(
        &self,
        run: &mut Run,
        phase: Phase,
        reason: &str,
    ) -> Result<(), ConductorError> {
        tracing::error!(run_id = %run.id, phase = %phase, reason = %reason, "Run failed");
        run.status = RunStatus::Failed;
        run.current_phase = Some(phase);
        self.run_store.update(run).await?;
        self.recorder
            .record_step(
                LogEntry::new(
                    &run.id,
                    phase.as_str(),
                    "phase_failed",
                    "coordinator",
                    RecordStatus::Failure,
                )
                .with_metadata(serde_json::json!({ "reason": reason })),
            )
            .await;
        Ok(())
    }
}

/// Runs the inner executor under the sentinel supervisor, so transient
/// failures inside the phase body are retried and recorded before the gate
/// ever sees them.
struct SupervisedExecutor<'a> {
    inner: &'a dyn PhaseExecutor,
    supervisor: &'a Supervisor,
}

#[async_trait]
impl PhaseExecutor for SupervisedExecutor<'_> {
    fn actor(&self) -> &str {
        self.inner.actor()
    }

    async fn execute(
        &self,
        ctx: &PhaseContext,
        attempt: u32,
    ) -> Result<PhaseOutput, ConductorError> {
        let call_ctx = CallContext::new(
            &ctx.run_id,
            ctx.phase.as_str(),
            format!("phase_body#{attempt}"),
            self.inner.actor(),
        );
        let outcome = self
            .supervisor
            .execute(&call_ctx, |_| async {
                self.inner
                    .execute(ctx, attempt)
                    .await
                    .map_err(|e| SupervisedError::new(e.to_string()))
            })
            .await?;
        Ok(outcome.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PhaseBudget, PhaseConfig};
    use crate::run::InMemoryRunStore;
    use shipwright_bus::InMemoryDispatcher;
    use shipwright_gatekeeper::{ArtifactRef, ComparisonOp, Metric, MetricKind};
    use shipwright_recorder::InMemoryRecordStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Executor that passes every gate; QA grounding improves with attempts.
    struct PipelineExecutor {
        qa_attempts: AtomicU32,
    }

    #[async_trait]
    impl PhaseExecutor for PipelineExecutor {
        async fn execute(
            &self,
            ctx: &PhaseContext,
            _attempt: u32,
        ) -> Result<PhaseOutput, ConductorError> {
            let mut output = PhaseOutput {
                cost_usd: 0.5,
                cost_tokens: 1_000,
                ..Default::default()
            };
            if ctx.phase == Phase::Qa {
                let n = self.qa_attempts.fetch_add(1, Ordering::SeqCst);
                let score = if n == 0 { 0.7 } else { 0.92 };
                output.readings.insert("grounding_score".to_string(), score);
                output
                    .artifacts
                    .push(ArtifactRef::new("report-1", "test_report"));
            }
            Ok(output)
        }
    }

    fn qa_rubric() -> GateRubric {
        GateRubric::new("qa_gate")
            .with_minimum_score(0)
            .with_required_artifact("test_report")
            .with_metric(
                Metric::new("grounding_score", MetricKind::Numeric, ComparisonOp::Ge, 0.9)
                    .required(),
            )
    }

    /// Table with a gate only on QA, so tests focus on one gated phase.
    fn qa_only_table() -> PhaseTable {
        let mut table = PhaseTable::standard();
        for phase in Phase::ORDER {
            let base = table.get(phase).clone();
            table = table.with_config(PhaseConfig {
                gate: if phase == Phase::Qa {
                    Some("qa_gate".to_string())
                } else {
                    None
                },
                ..base
            });
        }
        table
    }

    fn coordinator(
        dispatcher: Arc<InMemoryDispatcher>,
        recorder: Arc<Recorder>,
    ) -> PhaseCoordinator {
        PhaseCoordinator::new(
            Arc::new(InMemoryRunStore::new()),
            recorder,
            dispatcher,
        )
        .with_phase_table(qa_only_table())
        .with_gate("qa_gate", qa_rubric())
    }

    #[tokio::test]
    async fn test_run_walks_all_phases_and_completes() {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let recorder = Arc::new(Recorder::new(Arc::new(InMemoryRecordStore::new())));
        let coordinator = coordinator(dispatcher.clone(), recorder.clone());

        let run = coordinator
            .start_run("idea-to-ship", "1.0.0", "shard-a", HashMap::new())
            .await
            .unwrap();
        let executor = PipelineExecutor {
            qa_attempts: AtomicU32::new(0),
        };

        let finished = coordinator.run_to_completion(&run.id, &executor).await.unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.current_phase, Some(Phase::Beta));

        // One completion event per phase, one succeeded task per phase
        assert_eq!(dispatcher.stats().events_published, 12);
        let task_stats = coordinator.tasks().stats();
        assert_eq!(task_stats.succeeded, 12);
        assert_eq!(task_stats.running, 0);

        // The QA gate took two evaluations (fail then pass)
        let decisions = recorder.run_decisions(&run.id).await.unwrap();
        let gate_decisions: Vec<_> =
            decisions.iter().filter(|d| d.decider == "gatekeeper").collect();
        assert_eq!(gate_decisions.len(), 2);
    }

    #[tokio::test]
    async fn test_gate_exhaustion_fails_the_run() {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let recorder = Arc::new(Recorder::new(Arc::new(InMemoryRecordStore::new())));
        let coordinator = coordinator(dispatcher, recorder.clone());

        /// Never reaches the grounding threshold and never ships a report.
        struct HopelessExecutor;
        #[async_trait]
        impl PhaseExecutor for HopelessExecutor {
            async fn execute(
                &self,
                ctx: &PhaseContext,
                _attempt: u32,
            ) -> Result<PhaseOutput, ConductorError> {
                let mut output = PhaseOutput::default();
                if ctx.phase == Phase::Qa {
                    output.readings.insert("grounding_score".to_string(), 0.1);
                    output
                        .artifacts
                        .push(ArtifactRef::new("report-1", "test_report"));
                }
                Ok(output)
            }
        }

        let run = coordinator
            .start_run("idea-to-ship", "1.0.0", "shard-a", HashMap::new())
            .await
            .unwrap();
        let err = coordinator
            .run_to_completion(&run.id, &HopelessExecutor)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::GateRetriesExhausted { .. }));

        // The run failed at QA and kept its evidence
        let failed = coordinator.run_store.get(&run.id).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.current_phase, Some(Phase::Qa));
        let logs = recorder.run_logs(&run.id).await.unwrap();
        assert!(logs.iter().any(|l| l.step == "phase_failed"));
    }

    #[tokio::test]
    async fn test_advance_refuses_completed_run() {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let recorder = Arc::new(Recorder::new(Arc::new(InMemoryRecordStore::new())));
        let coordinator = coordinator(dispatcher, recorder);

        let run = coordinator
            .start_run("idea-to-ship", "1.0.0", "shard-a", HashMap::new())
            .await
            .unwrap();
        let executor = PipelineExecutor {
            qa_attempts: AtomicU32::new(0),
        };
        coordinator.run_to_completion(&run.id, &executor).await.unwrap();

        let err = coordinator.advance(&run.id, &executor).await.unwrap_err();
        assert!(matches!(err, ConductorError::RunNotActive { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_budget_refuses_phase_start() {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let recorder = Arc::new(Recorder::new(Arc::new(InMemoryRecordStore::new())));
        let budget = Arc::new(BudgetLedger::new());
        let coordinator = coordinator(dispatcher, recorder)
            .with_budget(budget.clone());

        let run = coordinator
            .start_run("idea-to-ship", "1.0.0", "shard-a", HashMap::new())
            .await
            .unwrap();

        // Burn the whole INTAKE cap up front
        let cap = PhaseBudget {
            usd: 2.0,
            tokens: 200_000,
        };
        let _ = budget.charge(&run.id, Phase::Intake, &cap, 5.0, 0);

        let executor = PipelineExecutor {
            qa_attempts: AtomicU32::new(0),
        };
        let err = coordinator.advance(&run.id, &executor).await.unwrap_err();
        assert!(matches!(err, ConductorError::BudgetExhausted { .. }));

        let failed = coordinator.run_store.get(&run.id).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_gate_rubric_is_config_error() {
        let dispatcher = Arc::new(InMemoryDispatcher::new());
        let recorder = Arc::new(Recorder::new(Arc::new(InMemoryRecordStore::new())));
        // qa_only_table references qa_gate, but no rubric is registered
        let coordinator = PhaseCoordinator::new(
            Arc::new(InMemoryRunStore::new()),
            recorder,
            dispatcher,
        )
        .with_phase_table(qa_only_table());

        let run = coordinator
            .start_run("idea-to-ship", "1.0.0", "shard-a", HashMap::new())
            .await
            .unwrap();
        let executor = PipelineExecutor {
            qa_attempts: AtomicU32::new(0),
        };
        let err = coordinator
            .run_to_completion(&run.id, &executor)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidConfig(_)));
    }
}
