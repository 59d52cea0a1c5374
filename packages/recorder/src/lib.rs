//! Shipwright-Recorder: Append-Only Audit Trail
//!
//! Captures an immutable, queryable trail of everything the control plane
//! does: steps, artifacts, decisions, scores, and costs, with per-run
//! rollups.
//!
//! Guarantees:
//! - Writes are append-only; no record is ever mutated after write
//! - Per-run ordering is by timestamp, ties broken by insertion sequence
//! - A failed write never aborts the caller: it is logged at WARN and kept
//!   in a pending buffer for a later flush (at-least-once to the store)
//!
//! # Example
//!
//! ```rust,ignore
//! use shipwright_recorder::{InMemoryRecordStore, LogEntry, Recorder, RecordStatus};
//!
//! let recorder = Recorder::new(Arc::new(InMemoryRecordStore::new()));
//! recorder.record_step(
//!     LogEntry::new("run-1", "INTAKE", "normalize", "agent-7", RecordStatus::Success)
//!         .with_cost(0.012, 1_800)
//!         .with_latency_ms(420),
//! ).await;
//! let summary = recorder.run_summary("run-1").await?;
//! ```

pub mod recorder;
pub mod rollup;
pub mod store;
pub mod types;

pub use recorder::Recorder;
pub use rollup::{PhaseRollup, RunSummary};
pub use store::{InMemoryRecordStore, RecordCounts, RecordStore};
pub use types::{
    AnyRecord, ArtifactRecord, CostRecord, DecisionRecord, LogEntry, LogFilter, RecordStatus,
    RecorderError, ScoreRecord,
};
