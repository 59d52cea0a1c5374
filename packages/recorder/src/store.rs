//! Shipwright-Recorder: Record Store
//!
//! Storage contract mirroring the relational layout (`run_logs`, `artifacts`,
//! `decisions`, `scores`, `costs`) plus an in-memory reference implementation.
//! Stores assign the insertion sequence; nothing is ever updated or deleted.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{
    AnyRecord, ArtifactRecord, CostRecord, DecisionRecord, LogEntry, LogFilter, RecorderError,
    ScoreRecord,
};

/// Append-only storage for recorder rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one record. The store assigns the insertion sequence.
    async fn append(&self, record: AnyRecord) -> Result<(), RecorderError>;

    /// Query step entries, ordered by (timestamp, sequence).
    async fn query_steps(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RecorderError>;

    /// All artifacts for a run, in insertion order.
    async fn artifacts_for_run(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, RecorderError>;

    /// All decisions for a run, in insertion order.
    async fn decisions_for_run(&self, run_id: &str) -> Result<Vec<DecisionRecord>, RecorderError>;

    /// All scores for a run, in insertion order.
    async fn scores_for_run(&self, run_id: &str) -> Result<Vec<ScoreRecord>, RecorderError>;

    /// All standalone cost lines for a run, in insertion order.
    async fn costs_for_run(&self, run_id: &str) -> Result<Vec<CostRecord>, RecorderError>;

    /// Row counts per table.
    async fn counts(&self) -> Result<RecordCounts, RecorderError>;
}

/// Row counts per record table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecordCounts {
    pub steps: usize,
    pub artifacts: usize,
    pub decisions: usize,
    pub scores: usize,
    pub costs: usize,
}

#[derive(Default)]
struct StoreInner {
    steps: Vec<LogEntry>,
    artifacts: Vec<ArtifactRecord>,
    decisions: Vec<DecisionRecord>,
    scores: Vec<ScoreRecord>,
    costs: Vec<CostRecord>,
    next_seq: u64,
}

/// In-memory reference store. Sequence assignment and appends share one lock,
/// so per-run ordering is exactly insertion order.
pub struct InMemoryRecordStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append(&self, record: AnyRecord) -> Result<(), RecorderError> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        match record {
            AnyRecord::Step(mut r) => {
                r.seq = seq;
                inner.steps.push(r);
            }
            AnyRecord::Artifact(mut r) => {
                r.seq = seq;
                inner.artifacts.push(r);
            }
            AnyRecord::Decision(mut r) => {
                r.seq = seq;
                inner.decisions.push(r);
            }
            AnyRecord::Score(mut r) => {
                r.seq = seq;
                inner.scores.push(r);
            }
            AnyRecord::Cost(mut r) => {
                r.seq = seq;
                inner.costs.push(r);
            }
        }
        Ok(())
    }

    async fn query_steps(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RecorderError> {
        let inner = self.inner.read();
        let mut entries: Vec<LogEntry> = inner
            .steps
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn artifacts_for_run(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, RecorderError> {
        Ok(self
            .inner
            .read()
            .artifacts
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn decisions_for_run(&self, run_id: &str) -> Result<Vec<DecisionRecord>, RecorderError> {
        Ok(self
            .inner
            .read()
            .decisions
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn scores_for_run(&self, run_id: &str) -> Result<Vec<ScoreRecord>, RecorderError> {
        Ok(self
            .inner
            .read()
            .scores
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn costs_for_run(&self, run_id: &str) -> Result<Vec<CostRecord>, RecorderError> {
        Ok(self
            .inner
            .read()
            .costs
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<RecordCounts, RecorderError> {
        let inner = self.inner.read();
        Ok(RecordCounts {
            steps: inner.steps.len(),
            artifacts: inner.artifacts.len(),
            decisions: inner.decisions.len(),
            scores: inner.scores.len(),
            costs: inner.costs.len(),
        })
    }
}
