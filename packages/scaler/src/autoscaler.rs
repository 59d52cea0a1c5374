//! Shipwright-Scaler: Autoscaler
//!
//! Periodically evaluates each registered scaling policy against its pool's
//! metrics and executes the resulting decision. Evaluations for one policy
//! are serialized; different policies never wait on each other.
//!
//! Rules of the road:
//! - Any single scale-up signal suffices; scale-down needs at least two
//! - Conflicting signals produce a recorded no-change decision
//! - The cooldown compared against is the one matching the chosen direction;
//!   scale-up and scale-down cooldowns never gate each other
//! - Predictive boost doubles the scale-up step when the load trend over the
//!   recent history rises more than 1.5x
//! - Pool bounds always hold: a pool below its minimum is topped up before
//!   any signal analysis

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use shipwright_bus::{BusEvent, Dispatcher, EventTopic};
use shipwright_recorder::{DecisionRecord, Recorder};

use crate::decision::{DecisionStatus, ScalingAction, ScalingDecision};
use crate::metrics::MetricsHistory;
use crate::policy::{ScalerError, ScalingPolicy};
use crate::worker::WorkerPool;

/// Autoscaler-wide settings.
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// Cadence of the evaluation loop
    pub evaluation_interval_ms: u64,
    /// Simulated readiness delay between spawn and idle. A real deployment
    /// replaces this with a readiness probe.
    pub readiness_grace_ms: u64,
    /// Samples in the predictive trend window
    pub trend_window: usize,
    /// Trend ratio above which the scale-up step doubles
    pub predictive_rise_threshold: f64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 30_000,
            readiness_grace_ms: 1_000,
            trend_window: 10,
            predictive_rise_threshold: 1.5,
        }
    }
}

struct PoolEntry {
    policy: ScalingPolicy,
    pool: Arc<WorkerPool>,
    history: MetricsHistory,
    last_scale_up: Option<DateTime<Utc>>,
    last_scale_down: Option<DateTime<Utc>>,
}

/// Owns every pool and policy; the only writer of worker state.
pub struct Autoscaler {
    config: AutoscalerConfig,
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<PoolEntry>>>>,
    decisions: Mutex<Vec<ScalingDecision>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    recorder: Option<Arc<Recorder>>,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            decisions: Mutex::new(Vec::new()),
            dispatcher: None,
            recorder: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Register a policy with the pool it governs.
    pub fn register_policy(
        &self,
        policy: ScalingPolicy,
        pool: Arc<WorkerPool>,
    ) -> Result<(), ScalerError> {
        policy.validate()?;
        tracing::info!(
            policy_id = %policy.policy_id,
            shard_id = %policy.shard_id,
            phase = %policy.phase,
            "Scaling policy registered"
        );
        self.entries.lock().insert(
            policy.policy_id.clone(),
            Arc::new(tokio::sync::Mutex::new(PoolEntry {
                policy,
                pool,
                history: MetricsHistory::default(),
                last_scale_up: None,
                last_scale_down: None,
            })),
        );
        Ok(())
    }

    pub fn remove_policy(&self, policy_id: &str) -> bool {
        self.entries.lock().remove(policy_id).is_some()
    }

    pub fn policy_ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Decisions taken so far, oldest first.
    pub fn decisions(&self) -> Vec<ScalingDecision> {
        self.decisions.lock().clone()
    }

    /// Evaluate one policy now. Returns the decision if one was taken;
    /// quiet ticks (no signal, or inside cooldown) return None.
    pub async fn evaluate_policy(
        &self,
        policy_id: &str,
    ) -> Result<Option<ScalingDecision>, ScalerError> {
        let entry_arc = self
            .entries
            .lock()
            .get(policy_id)
            .cloned()
            .ok_or_else(|| ScalerError::PolicyNotFound(policy_id.to_string()))?;

        // Per-policy serialization: the entry lock is held for the whole
        // evaluate-and-execute cycle
        let mut entry = entry_arc.lock().await;
        let metrics = entry.pool.metrics();
        entry.history.push(metrics.clone());

        let policy = entry.policy.clone();
        let current = metrics.current_workers;
        let now = Utc::now();

        // Bounds floor: a pool below its minimum is topped up unconditionally
        if current < policy.min_workers {
            let decision = ScalingDecision::new(
                &policy.policy_id,
                &policy.shard_id,
                &policy.phase,
                ScalingAction::ScaleUp,
                current,
                policy.min_workers,
                metrics,
            )
            .with_reason(format!(
                "pool below configured minimum ({current} < {})",
                policy.min_workers
            ));
            let decision = self.execute_scale_up(&mut entry, decision, now).await;
            return Ok(Some(decision));
        }

        let up_reasons = Self::scale_up_reasons(&policy, &metrics);
        let down_reasons = Self::scale_down_reasons(&policy, &metrics);
        let up_wanted = !up_reasons.is_empty() && current < policy.max_workers;
        let down_wanted = down_reasons.len() >= 2 && current > policy.min_workers;

        if up_wanted && down_wanted {
            let mut decision = ScalingDecision::new(
                &policy.policy_id,
                &policy.shard_id,
                &policy.phase,
                ScalingAction::NoChange,
                current,
                current,
                metrics,
            )
            .with_reason("scale-up and scale-down signals conflict; holding".to_string())
            .with_reasons(up_reasons)
            .with_reasons(down_reasons);
            decision.status = DecisionStatus::Completed;
            decision.executed_at = Some(now);
            tracing::warn!(policy_id = %policy.policy_id, "Conflicting scaling signals");
            self.persist(decision.clone()).await;
            return Ok(Some(decision));
        }

        if up_wanted {
            // Direction-matched cooldown
            if Self::in_cooldown(entry.last_scale_up, policy.scale_up_cooldown_ms, now) {
                tracing::debug!(policy_id = %policy.policy_id, "Scale-up inside cooldown");
                return Ok(None);
            }
            let mut step = policy.scale_up_increment;
            if policy.predictive_scaling {
                if let Some(trend) = entry.history.load_trend(self.config.trend_window) {
                    if trend > self.config.predictive_rise_threshold {
                        tracing::info!(
                            policy_id = %policy.policy_id,
                            trend,
                            "Predictive boost: doubling scale-up step"
                        );
                        step *= 2;
                    }
                }
            }
            let target = (current + step).min(policy.max_workers);
            let decision = ScalingDecision::new(
                &policy.policy_id,
                &policy.shard_id,
                &policy.phase,
                ScalingAction::ScaleUp,
                current,
                target,
                metrics,
            )
            .with_reasons(up_reasons);
            let decision = self.execute_scale_up(&mut entry, decision, now).await;
            return Ok(Some(decision));
        }

        if down_wanted {
            if Self::in_cooldown(entry.last_scale_down, policy.scale_down_cooldown_ms, now) {
                tracing::debug!(policy_id = %policy.policy_id, "Scale-down inside cooldown");
                return Ok(None);
            }
            let target = current
                .saturating_sub(policy.scale_down_decrement)
                .max(policy.min_workers);
            let decision = ScalingDecision::new(
                &policy.policy_id,
                &policy.shard_id,
                &policy.phase,
                ScalingAction::ScaleDown,
                current,
                target,
                metrics,
            )
            .with_reasons(down_reasons);
            let decision = self.execute_scale_down(&mut entry, decision, now).await;
            return Ok(Some(decision));
        }

        Ok(None)
    }

    /// Evaluate every registered policy once.
    pub async fn evaluate_all(&self) {
        let ids = self.policy_ids();
        for policy_id in ids {
            if let Err(e) = self.evaluate_policy(&policy_id).await {
                tracing::warn!(policy_id = %policy_id, error = %e, "Policy evaluation failed");
            }
        }
    }

    /// Evaluation loop on a cancellable ticker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
            self.config.evaluation_interval_ms,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.evaluate_all().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Autoscaler shutting down");
                        return;
                    }
                }
            }
        }
    }

    fn scale_up_reasons(
        policy: &ScalingPolicy,
        metrics: &crate::metrics::PoolMetrics,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if metrics.queue_depth > policy.target_queue_depth {
            reasons.push(format!(
                "queue depth {} above target {}",
                metrics.queue_depth, policy.target_queue_depth
            ));
        }
        if metrics.cpu_utilization > policy.target_cpu_utilization {
            reasons.push(format!(
                "cpu utilization {:.2} above target {:.2}",
                metrics.cpu_utilization, policy.target_cpu_utilization
            ));
        }
        if metrics.memory_utilization > policy.target_memory_utilization {
            reasons.push(format!(
                "memory utilization {:.2} above target {:.2}",
                metrics.memory_utilization, policy.target_memory_utilization
            ));
        }
        if metrics.avg_task_latency_ms > policy.target_task_latency_ms as f64 {
            reasons.push(format!(
                "task latency {:.0}ms above target {}ms",
                metrics.avg_task_latency_ms, policy.target_task_latency_ms
            ));
        }
        if metrics.idle_workers == 0 && metrics.queue_depth > 0 {
            reasons.push("no idle workers with work queued".to_string());
        }
        reasons
    }

    fn scale_down_reasons(
        policy: &ScalingPolicy,
        metrics: &crate::metrics::PoolMetrics,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if metrics.queue_depth == 0 {
            reasons.push("queue empty".to_string());
        }
        if metrics.cpu_utilization < policy.target_cpu_utilization * 0.5 {
            reasons.push(format!(
                "cpu utilization {:.2} below half of target",
                metrics.cpu_utilization
            ));
        }
        if metrics.memory_utilization < policy.target_memory_utilization * 0.5 {
            reasons.push(format!(
                "memory utilization {:.2} below half of target",
                metrics.memory_utilization
            ));
        }
        if metrics.idle_fraction() > 0.5 {
            reasons.push(format!(
                "idle fraction {:.2} above 0.5",
                metrics.idle_fraction()
            ));
        }
        reasons
    }

    fn in_cooldown(last: Option<DateTime<Utc>>, cooldown_ms: u64, now: DateTime<Utc>) -> bool {
        last.is_some_and(|t| now - t < ChronoDuration::milliseconds(cooldown_ms as i64))
    }

    async fn execute_scale_up(
        &self,
        entry: &mut PoolEntry,
        mut decision: ScalingDecision,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        decision.status = DecisionStatus::Executing;
        let to_spawn = decision.target_workers - decision.current_workers;
        let worker_ids = entry.pool.spawn_workers(to_spawn);
        entry.last_scale_up = Some(now);

        // Readiness after a grace period; a real deployment probes instead
        let pool = entry.pool.clone();
        let dispatcher = self.dispatcher.clone();
        let grace = self.config.readiness_grace_ms;
        let ready_ids = worker_ids.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(grace)).await;
            for worker_id in ready_ids {
                if pool.mark_ready(&worker_id) {
                    if let Some(dispatcher) = &dispatcher {
                        dispatcher
                            .publish(BusEvent::new(
                                EventTopic::WorkerReady,
                                serde_json::json!({ "worker_id": worker_id }),
                            ))
                            .await;
                    }
                }
            }
        });

        decision.status = DecisionStatus::Completed;
        decision.executed_at = Some(Utc::now());
        tracing::info!(
            policy_id = %decision.policy_id,
            from = decision.current_workers,
            to = decision.target_workers,
            "Scaled up"
        );

        self.emit(
            EventTopic::PoolScaledUp,
            serde_json::json!({
                "policy_id": decision.policy_id,
                "spawned": worker_ids,
                "target_workers": decision.target_workers,
            }),
        )
        .await;
        self.emit(
            EventTopic::ScalingCompleted,
            serde_json::to_value(&decision).unwrap_or_default(),
        )
        .await;
        self.persist(decision.clone()).await;
        decision
    }

    async fn execute_scale_down(
        &self,
        entry: &mut PoolEntry,
        mut decision: ScalingDecision,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        decision.status = DecisionStatus::Executing;
        let to_remove = decision.current_workers - decision.target_workers;
        let victims = entry.pool.drain_candidates(to_remove);
        entry.last_scale_down = Some(now);

        let mut terminated_now = Vec::new();
        for worker_id in &victims {
            let gone = if entry.policy.graceful_shutdown {
                entry.pool.begin_drain(worker_id)
            } else {
                entry.pool.terminate(worker_id);
                true
            };
            if gone {
                terminated_now.push(worker_id.clone());
            }
        }

        decision.status = DecisionStatus::Completed;
        decision.executed_at = Some(Utc::now());
        tracing::info!(
            policy_id = %decision.policy_id,
            from = decision.current_workers,
            to = decision.target_workers,
            draining = victims.len() - terminated_now.len(),
            "Scaled down"
        );

        for worker_id in &terminated_now {
            self.emit(
                EventTopic::WorkerTerminated,
                serde_json::json!({ "worker_id": worker_id }),
            )
            .await;
        }
        self.emit(
            EventTopic::PoolScaledDown,
            serde_json::json!({
                "policy_id": decision.policy_id,
                "drained": victims,
                "target_workers": decision.target_workers,
            }),
        )
        .await;
        self.emit(
            EventTopic::ScalingCompleted,
            serde_json::to_value(&decision).unwrap_or_default(),
        )
        .await;
        self.persist(decision.clone()).await;
        decision
    }

    async fn emit(&self, topic: EventTopic, payload: serde_json::Value) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.publish(BusEvent::new(topic, payload)).await;
        }
    }

    async fn persist(&self, decision: ScalingDecision) {
        if let Some(recorder) = &self.recorder {
            recorder
                .record_decision(
                    DecisionRecord::new(
                        &decision.shard_id,
                        &decision.phase,
                        "autoscaler",
                        decision.action.as_str(),
                    )
                    .with_context(serde_json::to_value(&decision).unwrap_or_default()),
                )
                .await;
        }
        self.decisions.lock().push(decision);
    }
}

impl Default for Autoscaler {
    fn default() -> Self {
        Self::new(AutoscalerConfig::default())
    }
}
