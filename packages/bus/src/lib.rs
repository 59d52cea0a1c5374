//! Shipwright-Bus: Event Topics & Collaborator Contracts
//!
//! The communication spine of the control plane:
//! - Closed set of event topics (phase completions, waivers, scaling, upgrades,
//!   knowledge-map deltas)
//! - Topic-based pub/sub dispatcher with an at-least-once delivery contract
//! - Contract to the external Knowledge Refinery subsystem
//! - Knowledge-map delta publisher with pluggable transports
//!
//! Everything that crosses a component boundary rides on one of these types.
//! The dispatcher shipped here is in-process; a broker-backed implementation
//! only has to satisfy the [`Dispatcher`] trait.

pub mod delta;
pub mod dispatcher;
pub mod error;
pub mod refinery;
pub mod topic;

pub use delta::{DeltaKind, DeltaPublisher, DeltaReport, DeltaTransport, KmapDelta};
pub use dispatcher::{BusEvent, DeliveryReport, Dispatcher, DispatcherStats, EventHandler, InMemoryDispatcher};
pub use error::BusError;
pub use refinery::{
    RefineOutcome, RefineRequest, RefineryClient, RefineryGateReport, RefineryMetrics,
    ACCEPTANCE_THRESHOLD, FISSION_COVERAGE_THRESHOLD, FUSION_CONSENSUS_THRESHOLD,
};
pub use topic::EventTopic;
