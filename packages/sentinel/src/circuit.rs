//! Shipwright-Sentinel: Circuit Breaker
//!
//! Per-actor fault isolation with the canonical transitions:
//! closed --(>= failure_threshold failures)--> open
//! open --(timeout elapsed)--> half-open
//! half-open --(>= success_threshold successes)--> closed
//! half-open --(any failure)--> open
//!
//! All transitions for an actor happen under one lock, so no concurrent
//! caller can observe a half-applied transition.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Circuit phase for one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long an open circuit rejects before allowing a probe
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout_ms: 30_000,
        }
    }
}

/// Verdict for one prospective call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Circuit closed; proceed
    Allow,
    /// Open timeout elapsed; circuit moved to half-open, probe allowed
    AllowProbe,
    /// Circuit open; do not invoke
    Reject {
        /// Time until the next probe is allowed
        retry_after_ms: u64,
    },
}

impl CircuitDecision {
    pub fn allowed(&self) -> bool {
        !matches!(self, Self::Reject { .. })
    }
}

#[derive(Debug, Clone)]
struct ActorCircuit {
    phase: CircuitPhase,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_state_change: DateTime<Utc>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl ActorCircuit {
    fn new() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_state_change: Utc::now(),
            last_failure_at: None,
        }
    }
}

/// Read-only snapshot of one actor's circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub actor: String,
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_state_change: DateTime<Utc>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Counts by phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CircuitStats {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Per-actor circuit breakers.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, ActorCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a call to `actor` may proceed. An elapsed open timeout
    /// transitions the circuit to half-open as part of this check.
    pub fn check(&self, actor: &str) -> CircuitDecision {
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(actor.to_string())
            .or_insert_with(ActorCircuit::new);

        match circuit.phase {
            CircuitPhase::Closed => CircuitDecision::Allow,
            CircuitPhase::HalfOpen => CircuitDecision::AllowProbe,
            CircuitPhase::Open => {
                let elapsed = Utc::now() - circuit.last_state_change;
                let timeout = ChronoDuration::milliseconds(self.config.open_timeout_ms as i64);
                if elapsed >= timeout {
                    circuit.phase = CircuitPhase::HalfOpen;
                    circuit.consecutive_successes = 0;
                    circuit.last_state_change = Utc::now();
                    tracing::info!(actor = %actor, "Circuit half-open; allowing probe");
                    CircuitDecision::AllowProbe
                } else {
                    let remaining = (timeout - elapsed).num_milliseconds().max(0) as u64;
                    CircuitDecision::Reject {
                        retry_after_ms: remaining,
                    }
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, actor: &str) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(actor.to_string())
            .or_insert_with(ActorCircuit::new);

        match circuit.phase {
            CircuitPhase::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitPhase::HalfOpen => {
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.config.success_threshold {
                    circuit.phase = CircuitPhase::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.consecutive_successes = 0;
                    circuit.last_state_change = Utc::now();
                    tracing::info!(actor = %actor, "Circuit closed");
                }
            }
            // Success while open: stale in-flight call; no transition
            CircuitPhase::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, actor: &str) {
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(actor.to_string())
            .or_insert_with(ActorCircuit::new);

        circuit.last_failure_at = Some(Utc::now());
        match circuit.phase {
            CircuitPhase::Closed => {
                circuit.consecutive_failures += 1;
                circuit.consecutive_successes = 0;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.phase = CircuitPhase::Open;
                    circuit.last_state_change = Utc::now();
                    tracing::warn!(
                        actor = %actor,
                        failures = circuit.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            CircuitPhase::HalfOpen => {
                circuit.phase = CircuitPhase::Open;
                circuit.consecutive_successes = 0;
                circuit.last_state_change = Utc::now();
                tracing::warn!(actor = %actor, "Probe failed; circuit re-opened");
            }
            CircuitPhase::Open => {}
        }
    }

    /// Snapshot of one actor's circuit, if it has ever been touched.
    pub fn snapshot(&self, actor: &str) -> Option<CircuitSnapshot> {
        self.circuits.lock().get(actor).map(|c| CircuitSnapshot {
            actor: actor.to_string(),
            phase: c.phase,
            consecutive_failures: c.consecutive_failures,
            consecutive_successes: c.consecutive_successes,
            last_state_change: c.last_state_change,
            last_failure_at: c.last_failure_at,
        })
    }

    /// Counts by phase.
    pub fn stats(&self) -> CircuitStats {
        let circuits = self.circuits.lock();
        let mut stats = CircuitStats::default();
        for circuit in circuits.values() {
            match circuit.phase {
                CircuitPhase::Closed => stats.closed += 1,
                CircuitPhase::Open => stats.open += 1,
                CircuitPhase::HalfOpen => stats.half_open += 1,
            }
        }
        stats
    }

    /// Drop an actor's circuit entirely (e.g. actor decommissioned).
    pub fn forget(&self, actor: &str) {
        self.circuits.lock().remove(actor);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
