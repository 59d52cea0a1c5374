//! Shipwright-Sentinel: Supervisor
//!
//! Wraps any retriable call with quarantine checks, the circuit breaker, and
//! per-class retry policies. Every attempt is recorded. Recoverable errors
//! never escape: the caller gets either a value or a terminal
//! [`SentinelError`] that says what to do next.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use shipwright_recorder::{LogEntry, Recorder, RecordStatus};

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitDecision};
use crate::class::ErrorClass;
use crate::quarantine::QuarantineRoster;
use crate::retry::{Escalation, RetryPolicyTable};

/// Where a supervised call is happening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub run_id: String,
    pub phase: String,
    pub step: String,
    pub actor: String,
}

impl CallContext {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        step: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            phase: phase.into(),
            step: step.into(),
            actor: actor.into(),
        }
    }
}

/// Supervisor thresholds beyond the per-class retry policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Failure streak that quarantines an actor
    pub quarantine_after_failures: u32,
    /// Attempt count at which an exhausted Fail-policy call still escalates
    pub escalate_after_retries: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            quarantine_after_failures: 5,
            escalate_after_retries: 3,
        }
    }
}

/// Error returned by a supervised operation. Attach a class to override the
/// text heuristic.
#[derive(Debug, Clone)]
pub struct SupervisedError {
    pub message: String,
    pub class: Option<ErrorClass>,
}

impl SupervisedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class: None,
        }
    }

    pub fn with_class(mut self, class: ErrorClass) -> Self {
        self.class = Some(class);
        self
    }

    fn resolved_class(&self) -> ErrorClass {
        self.class
            .unwrap_or_else(|| ErrorClass::classify(&self.message))
    }
}

impl std::fmt::Display for SupervisedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Successful supervised call plus how much work it took.
#[derive(Debug, Clone)]
pub struct SupervisedOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Structured escalation handed upward on exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub run_id: String,
    pub phase: String,
    pub step: String,
    pub actor: String,
    pub class: ErrorClass,
    pub attempts: u32,
    pub last_error: String,
    pub escalation: Escalation,
    /// True when the failure crossed an escalation threshold and needs a
    /// decision above the supervisor
    pub escalated: bool,
}

/// Terminal outcomes of a supervised call.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The actor's circuit is open; the call was not invoked.
    #[error("circuit open for actor '{actor}'; retry in {retry_after_ms}ms")]
    CircuitOpen { actor: String, retry_after_ms: u64 },

    /// The actor is quarantined; the call was not invoked.
    #[error("actor '{actor}' is quarantined: {reason}")]
    Quarantined { actor: String, reason: String },

    /// Shutdown was signalled during a backoff sleep.
    #[error("supervised call for actor '{actor}' cancelled during backoff")]
    Cancelled { actor: String },

    /// Retries exhausted.
    #[error("supervised call exhausted after {} attempts ({}): {}", .notice.attempts, .notice.class, .notice.last_error)]
    Exhausted { notice: EscalationNotice },
}

impl SentinelError {
    /// Machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Quarantined { .. } => "quarantined",
            Self::Cancelled { .. } => "cancelled",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    /// Actions the surrounding system can surface to an operator.
    pub fn required_actions(&self) -> Vec<String> {
        match self {
            Self::CircuitOpen { actor, retry_after_ms } => vec![format!(
                "wait {retry_after_ms}ms before retrying actor '{actor}' or route to an alternative"
            )],
            Self::Quarantined { actor, .. } => {
                vec![format!("investigate actor '{actor}' and release it from quarantine")]
            }
            Self::Cancelled { .. } => vec!["re-dispatch the call after restart".to_string()],
            Self::Exhausted { notice } => match notice.escalation {
                Escalation::FixSynth => {
                    vec!["hand the failing output to a repair agent".to_string()]
                }
                Escalation::AlternateTool => {
                    vec!["retry through the fallback ladder with an alternative tool".to_string()]
                }
                Escalation::Fail => {
                    vec![format!("review failure of step '{}' manually", notice.step)]
                }
            },
        }
    }
}

/// Composes circuit breaker, retry policies, and quarantine around any call.
pub struct Supervisor {
    config: SupervisorConfig,
    policies: RetryPolicyTable,
    circuit: CircuitBreaker,
    quarantine: QuarantineRoster,
    recorder: Option<Arc<Recorder>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            policies: RetryPolicyTable::standard(),
            circuit: CircuitBreaker::new(CircuitBreakerConfig::default()),
            quarantine: QuarantineRoster::new(),
            recorder: None,
            shutdown: None,
        }
    }

    pub fn with_policies(mut self, policies: RetryPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_circuit_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = CircuitBreaker::new(config);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The circuit breaker, for observation.
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// The quarantine roster, for observation and release.
    pub fn quarantine(&self) -> &QuarantineRoster {
        &self.quarantine
    }

    /// Run `op` under supervision. `op` receives the 0-indexed attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        mut op: F,
    ) -> Result<SupervisedOutcome<T>, SentinelError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SupervisedError>>,
    {
        if let Some(entry) = self.quarantine.entry(&ctx.actor) {
            self.record_attempt(ctx, 0, RecordStatus::Skipped, 0, Some("quarantined"))
                .await;
            return Err(SentinelError::Quarantined {
                actor: ctx.actor.clone(),
                reason: entry.reason,
            });
        }

        if let CircuitDecision::Reject { retry_after_ms } = self.circuit.check(&ctx.actor) {
            self.record_attempt(ctx, 0, RecordStatus::Skipped, 0, Some("circuit_open"))
                .await;
            return Err(SentinelError::CircuitOpen {
                actor: ctx.actor.clone(),
                retry_after_ms,
            });
        }

        let mut attempt: u32 = 0;
        loop {
            let started = std::time::Instant::now();
            match op(attempt).await {
                Ok(value) => {
                    self.circuit.record_success(&ctx.actor);
                    self.quarantine.note_success(&ctx.actor);
                    self.record_attempt(
                        ctx,
                        attempt,
                        RecordStatus::Success,
                        started.elapsed().as_millis() as u64,
                        None,
                    )
                    .await;
                    return Ok(SupervisedOutcome {
                        value,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    let class = error.resolved_class();
                    self.circuit.record_failure(&ctx.actor);
                    let streak = self.quarantine.note_failure(&ctx.actor);
                    let policy = self.policies.policy_for(class);
                    let will_retry = class.is_retryable() && attempt < policy.max_retries;

                    self.record_attempt(
                        ctx,
                        attempt,
                        if will_retry {
                            RecordStatus::Retry
                        } else {
                            RecordStatus::Failure
                        },
                        started.elapsed().as_millis() as u64,
                        Some(error.message.as_str()),
                    )
                    .await;

                    if will_retry {
                        let delay = policy.jittered_delay(attempt);
                        tracing::debug!(
                            actor = %ctx.actor,
                            step = %ctx.step,
                            attempt,
                            class = %class,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after backoff"
                        );
                        if !self.sleep_cancellable(delay).await {
                            return Err(SentinelError::Cancelled {
                                actor: ctx.actor.clone(),
                            });
                        }
                        attempt += 1;
                        continue;
                    }

                    let attempts = attempt + 1;
                    if streak >= self.config.quarantine_after_failures {
                        self.quarantine.quarantine(
                            &ctx.actor,
                            format!("{streak} consecutive failures, last: {}", error.message),
                        );
                    }

                    let escalated = policy.escalation != Escalation::Fail
                        || attempts >= self.config.escalate_after_retries;
                    return Err(SentinelError::Exhausted {
                        notice: EscalationNotice {
                            run_id: ctx.run_id.clone(),
                            phase: ctx.phase.clone(),
                            step: ctx.step.clone(),
                            actor: ctx.actor.clone(),
                            class,
                            attempts,
                            last_error: error.message,
                            escalation: policy.escalation,
                            escalated,
                        },
                    });
                }
            }
        }
    }

    /// Sleep that races the shutdown signal. Returns false when cancelled.
    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        let Some(rx) = &self.shutdown else {
            tokio::time::sleep(duration).await;
            return true;
        };
        let mut rx = rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = async {
                // A closed channel means no one can signal shutdown anymore
                let signalled = rx.wait_for(|stop| *stop).await.is_ok();
                if !signalled {
                    std::future::pending::<()>().await;
                }
            } => false,
        }
    }

    async fn record_attempt(
        &self,
        ctx: &CallContext,
        attempt: u32,
        status: RecordStatus,
        latency_ms: u64,
        error: Option<&str>,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let metadata = serde_json::json!({
            "attempt": attempt,
            "error": error,
        });
        recorder
            .record_step(
                LogEntry::new(&ctx.run_id, &ctx.phase, &ctx.step, &ctx.actor, status)
                    .with_latency_ms(latency_ms)
                    .with_metadata(metadata),
            )
            .await;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}
