//! Shipwright-Conductor: Error Types
//!
//! Every variant carries a machine-readable kind (`kind()`), a human reason
//! (`Display`), and the actions the surrounding system can surface
//! (`required_actions()`). Gate failures are *not* errors; only exhausted or
//! escalated ones surface here.

use thiserror::Error;

use shipwright_sentinel::SentinelError;

/// Conductor errors.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("run '{run_id}' is not active (status '{status}')")]
    RunNotActive { run_id: String, status: String },

    #[error("budget exhausted for run '{run_id}' phase {phase}")]
    BudgetExhausted { run_id: String, phase: String },

    #[error("phase executor failed: {0}")]
    ExecutorFailed(String),

    #[error(transparent)]
    Supervision(#[from] SentinelError),

    #[error("gate '{gate}' still failing after {attempts} attempts (score {score}): {reasons:?}")]
    GateRetriesExhausted {
        gate: String,
        attempts: u32,
        score: u32,
        reasons: Vec<String>,
    },

    #[error("gate '{gate}' escalated: {reasons:?}")]
    GateEscalated { gate: String, reasons: Vec<String> },

    #[error("auto-fix strategy '{strategy}' failed: {reason}")]
    AutoFixFailed { strategy: String, reason: String },

    #[error("workflow version '{workflow_id}@{version}' not found")]
    VersionNotFound { workflow_id: String, version: String },

    #[error("workflow version '{workflow_id}@{version}' already registered")]
    VersionExists { workflow_id: String, version: String },

    #[error("invalid semver '{0}'")]
    InvalidVersion(String),

    #[error("run cannot be upgraded mid-run: {blockers:?}")]
    UpgradeIncompatible { blockers: Vec<String> },

    #[error("migration step '{step}' failed: {reason}; rollbacks executed")]
    MigrationFailed { step: String, reason: String },

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("run store failure: {0}")]
    Store(String),
}

impl ConductorError {
    /// Machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunNotFound(_) => "run_not_found",
            Self::RunNotActive { .. } => "run_not_active",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::ExecutorFailed(_) => "executor_failed",
            Self::Supervision(_) => "supervision",
            Self::GateRetriesExhausted { .. } => "gate_retries_exhausted",
            Self::GateEscalated { .. } => "gate_escalated",
            Self::AutoFixFailed { .. } => "auto_fix_failed",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::VersionExists { .. } => "version_exists",
            Self::InvalidVersion(_) => "invalid_version",
            Self::UpgradeIncompatible { .. } => "upgrade_incompatible",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Store(_) => "store",
        }
    }

    /// Actions the surrounding system can surface to an operator.
    pub fn required_actions(&self) -> Vec<String> {
        match self {
            Self::BudgetExhausted { run_id, phase } => vec![format!(
                "raise the {phase} budget for run '{run_id}' or abort the run"
            )],
            Self::GateRetriesExhausted { gate, .. } => vec![
                format!("review the '{gate}' evidence pack"),
                "request a waiver or remediate manually".to_string(),
            ],
            Self::GateEscalated { gate, .. } => {
                vec![format!("provide the artifacts the '{gate}' gate requires")]
            }
            Self::Supervision(inner) => inner.required_actions(),
            Self::UpgradeIncompatible { blockers } => blockers
                .iter()
                .map(|b| format!("resolve upgrade blocker: {b}"))
                .collect(),
            Self::MigrationFailed { step, .. } => {
                vec![format!("inspect migration step '{step}' and retry the upgrade")]
            }
            _ => Vec::new(),
        }
    }
}
