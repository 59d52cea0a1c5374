//! Shipwright-Sentinel: Supervision & Unsticking
//!
//! Everything that keeps a long-running pipeline alive when its workers
//! misbehave:
//! - Error taxonomy and per-class retry policies with backoff + jitter
//! - Per-actor circuit breakers (closed / open / half-open)
//! - Quarantine roster for repeat offenders
//! - Heartbeat-based stall detection and progress-slope plateau detection
//! - Fallback ladders across functionally-similar tools
//! - Work shrinking for oversized scopes
//!
//! The [`Supervisor`] composes the first three around any retriable call;
//! recoverable errors never bubble past it.

pub mod circuit;
pub mod class;
pub mod fallback;
pub mod heartbeat;
pub mod quarantine;
pub mod retry;
pub mod shrink;
pub mod slope;
pub mod supervisor;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitDecision, CircuitPhase, CircuitSnapshot, CircuitStats};
pub use class::ErrorClass;
pub use fallback::{category_of, FallbackLadder, LadderAttempt, LadderError, LadderSuccess};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor, HeartbeatSnapshot, HeartbeatStats};
pub use quarantine::{QuarantineEntry, QuarantineRoster, QuarantineStats};
pub use retry::{Backoff, Escalation, RetryPolicy, RetryPolicyTable};
pub use shrink::WorkShrinker;
pub use slope::{PlateauStatus, ProgressMonitor, SlopeConfig};
pub use supervisor::{
    CallContext, EscalationNotice, SentinelError, SupervisedError, SupervisedOutcome, Supervisor,
    SupervisorConfig,
};
