//! Shipwright-Toolkit: Tools & Value of Information
//!
//! The tool side of the control plane:
//! - Closed capability taxonomy shared by tools and agent requests
//! - Tool descriptors with cost/latency estimators and handling attributes
//! - In-memory registry indexed by capability and by id
//! - The VoI analyzer that decides whether consulting a tool is worth it at
//!   all, and if so which one, under budget and policy constraints
//!
//! Tool *execution* is not here; the registry hands descriptors to whoever
//! owns the invocation (the phase coordinator, via its [`ToolInvoker`]).

pub mod capability;
pub mod registry;
pub mod tool;
pub mod voi;

pub use capability::CapabilityClass;
pub use registry::{RegistryStats, ToolRegistry};
pub use tool::{CostEstimate, ToolInvoker, ToolOutput, ToolSpec, ToolkitError};
pub use voi::{
    AnalysisRequest, Analyzer, AnalyzerConfig, BudgetSnapshot, PiiPolicy, ToolAnalysis, VoiScore,
};
