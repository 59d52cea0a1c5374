//! Shipwright-Recorder: Recorder Facade
//!
//! The write/query surface the rest of the control plane uses. A record write
//! failure must not abort the caller: failed appends are logged at WARN and
//! parked in a pending buffer that `flush_pending` retries at the next flush
//! point. Delivery to the store is therefore at-least-once.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::rollup::RunSummary;
use crate::store::{RecordCounts, RecordStore};
use crate::types::{
    AnyRecord, ArtifactRecord, CostRecord, DecisionRecord, LogEntry, LogFilter, RecorderError,
    ScoreRecord,
};

/// Append-only recorder over a pluggable store.
pub struct Recorder {
    store: Arc<dyn RecordStore>,
    pending: Mutex<Vec<AnyRecord>>,
}

impl Recorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Record one executed step.
    pub async fn record_step(&self, entry: LogEntry) {
        self.append(AnyRecord::Step(entry)).await;
    }

    /// Record a produced artifact.
    pub async fn record_artifact(&self, record: ArtifactRecord) {
        self.append(AnyRecord::Artifact(record)).await;
    }

    /// Record a decision.
    pub async fn record_decision(&self, record: DecisionRecord) {
        self.append(AnyRecord::Decision(record)).await;
    }

    /// Record a score.
    pub async fn record_score(&self, record: ScoreRecord) {
        self.append(AnyRecord::Score(record)).await;
    }

    /// Record a standalone cost line.
    pub async fn record_cost(&self, record: CostRecord) {
        self.append(AnyRecord::Cost(record)).await;
    }

    async fn append(&self, record: AnyRecord) {
        if let Err(e) = self.store.append(record.clone()).await {
            tracing::warn!(
                run_id = record.run_id(),
                error = %e,
                "Record append failed; parked for retry"
            );
            self.pending.lock().push(record);
        }
    }

    /// Retry every parked record. Returns how many were flushed; records the
    /// store rejects again stay parked.
    pub async fn flush_pending(&self) -> usize {
        let parked: Vec<AnyRecord> = std::mem::take(&mut *self.pending.lock());
        if parked.is_empty() {
            return 0;
        }

        let mut flushed = 0;
        let mut still_pending = Vec::new();
        for record in parked {
            match self.store.append(record.clone()).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    tracing::warn!(run_id = record.run_id(), error = %e, "Flush retry failed");
                    still_pending.push(record);
                }
            }
        }
        if !still_pending.is_empty() {
            self.pending.lock().extend(still_pending);
        }
        flushed
    }

    /// Number of records awaiting a flush retry.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Query step entries. Ordered by (timestamp, insertion sequence).
    pub async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RecorderError> {
        self.store.query_steps(filter).await
    }

    /// All step entries for a run, oldest first.
    pub async fn run_logs(&self, run_id: &str) -> Result<Vec<LogEntry>, RecorderError> {
        self.store.query_steps(&LogFilter::for_run(run_id)).await
    }

    /// All artifacts recorded for a run.
    pub async fn run_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, RecorderError> {
        self.store.artifacts_for_run(run_id).await
    }

    /// All decisions recorded for a run.
    pub async fn run_decisions(&self, run_id: &str) -> Result<Vec<DecisionRecord>, RecorderError> {
        self.store.decisions_for_run(run_id).await
    }

    /// All scores recorded for a run.
    pub async fn run_scores(&self, run_id: &str) -> Result<Vec<ScoreRecord>, RecorderError> {
        self.store.scores_for_run(run_id).await
    }

    /// Rollup for one run, derived purely from the log.
    pub async fn run_summary(&self, run_id: &str) -> Result<RunSummary, RecorderError> {
        let steps = self.store.query_steps(&LogFilter::for_run(run_id)).await?;
        let costs = self.store.costs_for_run(run_id).await?;
        Ok(RunSummary::compute(run_id, &steps, &costs))
    }

    /// Store row counts.
    pub async fn counts(&self) -> Result<RecordCounts, RecorderError> {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use crate::types::RecordStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store that fails appends while `failing` is set.
    struct FlakyStore {
        inner: InMemoryRecordStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryRecordStore::new(),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn append(&self, record: AnyRecord) -> Result<(), RecorderError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RecorderError::AppendFailed("store offline".to_string()));
            }
            self.inner.append(record).await
        }

        async fn query_steps(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, RecorderError> {
            self.inner.query_steps(filter).await
        }

        async fn artifacts_for_run(
            &self,
            run_id: &str,
        ) -> Result<Vec<ArtifactRecord>, RecorderError> {
            self.inner.artifacts_for_run(run_id).await
        }

        async fn decisions_for_run(
            &self,
            run_id: &str,
        ) -> Result<Vec<DecisionRecord>, RecorderError> {
            self.inner.decisions_for_run(run_id).await
        }

        async fn scores_for_run(&self, run_id: &str) -> Result<Vec<ScoreRecord>, RecorderError> {
            self.inner.scores_for_run(run_id).await
        }

        async fn costs_for_run(&self, run_id: &str) -> Result<Vec<CostRecord>, RecorderError> {
            self.inner.costs_for_run(run_id).await
        }

        async fn counts(&self) -> Result<RecordCounts, RecorderError> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn test_write_failure_parks_instead_of_failing() {
        let store = Arc::new(FlakyStore::new());
        let recorder = Recorder::new(store.clone());

        store.failing.store(true, Ordering::SeqCst);
        recorder
            .record_step(LogEntry::new("run-1", "INTAKE", "s1", "a", RecordStatus::Success))
            .await;
        assert_eq!(recorder.pending_count(), 1);
        assert_eq!(store.counts().await.unwrap().steps, 0);

        store.failing.store(false, Ordering::SeqCst);
        let flushed = recorder.flush_pending().await;
        assert_eq!(flushed, 1);
        assert_eq!(recorder.pending_count(), 0);
        assert_eq!(store.counts().await.unwrap().steps, 1);
    }

    #[tokio::test]
    async fn test_flush_keeps_rejected_records_parked() {
        let store = Arc::new(FlakyStore::new());
        let recorder = Recorder::new(store.clone());

        store.failing.store(true, Ordering::SeqCst);
        recorder
            .record_cost(CostRecord::new("run-1", "QA", "a", 1.0, 100))
            .await;
        let flushed = recorder.flush_pending().await;
        assert_eq!(flushed, 0);
        assert_eq!(recorder.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_run_logs_ordered() {
        let recorder = Recorder::new(Arc::new(InMemoryRecordStore::new()));
        for step in ["a", "b", "c"] {
            recorder
                .record_step(LogEntry::new("run-1", "BUILD", step, "w", RecordStatus::Success))
                .await;
        }
        let logs = recorder.run_logs("run-1").await.unwrap();
        let names: Vec<&str> = logs.iter().map(|l| l.step.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(logs.windows(2).all(|w| w[0].seq < w[1].seq));
    }
}
