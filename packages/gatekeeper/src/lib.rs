//! Shipwright-Gatekeeper: Quality Gates & Waivers
//!
//! Gates sit between pipeline phases. A gate is *data* - a rubric of
//! weighted metrics plus a required-artifact list - evaluated by one shared
//! path that produces a weighted score, an evidence pack, a decision with
//! reasons, and remediation recommendations. "Design gate" and "QA gate"
//! differ only in the rubric values they load.
//!
//! Waivers are the accountable escape hatch: a time-bounded, owned,
//! compensated override of one specific gate violation, swept to expiry by
//! a background task.

pub mod evaluation;
pub mod rubric;
pub mod waiver;

pub use evaluation::{
    ArtifactRef, EvidencePack, GateDecision, GateEvaluation, GateStatus, MetricReadings,
    MetricResult,
};
pub use rubric::{ComparisonOp, GateRubric, Metric, MetricKind};
pub use waiver::{
    GateError, Waiver, WaiverManager, WaiverRequest, WaiverStats, WaiverStatus, SWEEP_INTERVAL_MS,
};
