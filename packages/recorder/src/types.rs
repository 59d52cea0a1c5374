//! Shipwright-Recorder: Record Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Recorder errors. Only queries surface these; writes degrade to the
/// pending buffer instead of failing the caller.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The backing store rejected an append.
    #[error("record store append failed: {0}")]
    AppendFailed(String),

    /// The backing store failed a query.
    #[error("record store query failed: {0}")]
    QueryFailed(String),
}

/// Outcome recorded for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Step completed successfully
    Success,
    /// Step failed terminally
    Failure,
    /// Step failed and will be retried
    Retry,
    /// Step was skipped (short-circuit, budget refusal, ...)
    Skipped,
}

/// One executed step. The `run_logs` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Record ID
    pub id: Uuid,
    /// Run this step belongs to
    pub run_id: String,
    /// Phase name at execution time
    pub phase: String,
    /// Step name (e.g. "normalize", "gate_eval", "scale_up")
    pub step: String,
    /// Acting component or agent
    pub actor: String,
    /// Opaque inputs
    pub inputs: serde_json::Value,
    /// Opaque outputs
    pub outputs: serde_json::Value,
    /// Optional score attached to the step
    pub score: Option<f64>,
    /// Cost of the step in USD
    pub cost_usd: f64,
    /// Cost of the step in tokens
    pub cost_tokens: u64,
    /// Wall-clock latency
    pub latency_ms: u64,
    /// Outcome
    pub status: RecordStatus,
    /// Decision attached to the step, if any
    pub decision: Option<String>,
    /// Gate involved, if any
    pub gate: Option<String>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Write timestamp
    pub recorded_at: DateTime<Utc>,
    /// Store-assigned insertion sequence; breaks timestamp ties
    #[serde(default)]
    pub seq: u64,
}

impl LogEntry {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        step: impl Into<String>,
        actor: impl Into<String>,
        status: RecordStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            phase: phase.into(),
            step: step.into(),
            actor: actor.into(),
            inputs: serde_json::Value::Null,
            outputs: serde_json::Value::Null,
            score: None,
            cost_usd: 0.0,
            cost_tokens: 0,
            latency_ms: 0,
            status,
            decision: None,
            gate: None,
            metadata: serde_json::Value::Null,
            recorded_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: serde_json::Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_cost(mut self, usd: f64, tokens: u64) -> Self {
        self.cost_usd = usd;
        self.cost_tokens = tokens;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A produced artifact. The `artifacts` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub run_id: String,
    pub phase: String,
    /// Artifact type (e.g. "prd", "arch_diagram", "test_report")
    pub artifact_type: String,
    /// Human-readable name
    pub name: String,
    /// Opaque content envelope
    pub content: serde_json::Value,
    /// Actor that produced it
    pub produced_by: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl ArtifactRecord {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        artifact_type: impl Into<String>,
        name: impl Into<String>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            phase: phase.into(),
            artifact_type: artifact_type.into(),
            name: name.into(),
            content: serde_json::Value::Null,
            produced_by: produced_by.into(),
            recorded_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }
}

/// A recorded decision with its reasons. The `decisions` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub run_id: String,
    pub phase: String,
    /// Component that decided (e.g. "voi_analyzer", "gatekeeper")
    pub decider: String,
    /// The decision itself (e.g. "use_tools=false", "scale_up")
    pub decision: String,
    /// Human-readable reasons
    pub reasons: Vec<String>,
    /// Opaque decision context
    pub context: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl DecisionRecord {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        decider: impl Into<String>,
        decision: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            phase: phase.into(),
            decider: decider.into(),
            decision: decision.into(),
            reasons: Vec::new(),
            context: serde_json::Value::Null,
            recorded_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// A recorded score. The `scores` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: Uuid,
    pub run_id: String,
    pub phase: String,
    /// What was scored (gate name, artifact id, ...)
    pub subject: String,
    pub score: f64,
    pub max_score: f64,
    /// Per-dimension breakdown
    pub breakdown: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl ScoreRecord {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        subject: impl Into<String>,
        score: f64,
        max_score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            phase: phase.into(),
            subject: subject.into(),
            score,
            max_score,
            breakdown: serde_json::Value::Null,
            recorded_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_breakdown(mut self, breakdown: serde_json::Value) -> Self {
        self.breakdown = breakdown;
        self
    }
}

/// A standalone cost line not tied to a single step. The `costs` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub run_id: String,
    pub phase: String,
    pub actor: String,
    pub usd: f64,
    pub tokens: u64,
    /// Cost category (e.g. "llm", "tool", "infra")
    pub category: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl CostRecord {
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        actor: impl Into<String>,
        usd: f64,
        tokens: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            phase: phase.into(),
            actor: actor.into(),
            usd,
            tokens,
            category: "llm".to_string(),
            recorded_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Union of all record kinds, used for the pending-retry buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyRecord {
    Step(LogEntry),
    Artifact(ArtifactRecord),
    Decision(DecisionRecord),
    Score(ScoreRecord),
    Cost(CostRecord),
}

impl AnyRecord {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Step(r) => &r.run_id,
            Self::Artifact(r) => &r.run_id,
            Self::Decision(r) => &r.run_id,
            Self::Score(r) => &r.run_id,
            Self::Cost(r) => &r.run_id,
        }
    }
}

/// Filter for [`crate::Recorder::query_logs`]. Empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub run_id: Option<String>,
    pub phase: Option<String>,
    pub actor: Option<String>,
    pub status: Option<RecordStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Does an entry match this filter?
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(run_id) = &self.run_id {
            if &entry.run_id != run_id {
                return false;
            }
        }
        if let Some(phase) = &self.phase {
            if &entry.phase != phase {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.recorded_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.recorded_at > until {
                return false;
            }
        }
        true
    }
}
