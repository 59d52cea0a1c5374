//! Shipwright-Conductor: Workflow Versioner
//!
//! Workflow definitions are semver-tagged: phase list, per-phase config,
//! breaking flag, migration notes. A running run can move to a newer version
//! mid-flight when the target is compatible; the upgrade executes an ordered
//! list of migration steps and, on any failure, replays their rollbacks in
//! reverse before reporting the error. The run's version pin only advances
//! after every step succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shipwright_bus::{BusEvent, Dispatcher, EventTopic};

use crate::error::ConductorError;
use crate::phase::{Phase, PhaseConfig};
use crate::run::RunStore;

/// A registered workflow definition version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub workflow_id: String,
    /// Semver, e.g. "1.2.0"
    pub version: String,
    pub description: String,
    /// Ordered phase list of this definition
    pub phases: Vec<Phase>,
    /// Per-phase configuration overrides
    pub phase_configs: Vec<PhaseConfig>,
    pub breaking_changes: bool,
    pub migration_notes: String,
    pub deprecated: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl WorkflowVersion {
    pub fn new(
        workflow_id: impl Into<String>,
        version: impl Into<String>,
        phases: Vec<Phase>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            version: version.into(),
            description: String::new(),
            phases,
            phase_configs: Vec::new(),
            breaking_changes: false,
            migration_notes: String::new(),
            deprecated: false,
            created_at: Utc::now(),
            created_by: "system".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_breaking_changes(mut self, breaking: bool) -> Self {
        self.breaking_changes = breaking;
        self
    }

    pub fn with_phase_config(mut self, config: PhaseConfig) -> Self {
        self.phase_configs.push(config);
        self
    }
}

/// Parse "major.minor.patch" into its numeric triple.
pub(crate) fn parse_semver(version: &str) -> Result<(u64, u64, u64), ConductorError> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(ConductorError::InvalidVersion(version.to_string()));
    }
    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| ConductorError::InvalidVersion(version.to_string()))
    };
    Ok((parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
}

/// One migration step: an opaque action paired with its rollback. The
/// versioner never inspects step content.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn description(&self) -> &str;

    /// Safe steps may be retried blindly; unsafe ones need operator review
    /// after a failed upgrade.
    fn safe(&self) -> bool {
        true
    }

    async fn apply(&self) -> Result<(), ConductorError>;
    async fn rollback(&self) -> Result<(), ConductorError>;
}

/// Mid-run compatibility verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub can_upgrade_mid_run: bool,
    pub blockers: Vec<String>,
}

/// Result of a successful upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeReport {
    pub run_id: String,
    pub from_version: String,
    pub to_version: String,
    pub steps_applied: usize,
}

/// Registry of workflow versions plus the mid-run upgrade machinery.
pub struct WorkflowVersioner {
    versions: Mutex<HashMap<(String, String), WorkflowVersion>>,
    run_store: Arc<dyn RunStore>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl WorkflowVersioner {
    pub fn new(run_store: Arc<dyn RunStore>) -> Self {
        Self {
            versions: Mutex::new(HashMap::new()),
            run_store,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Register a version. The (workflow, version) pair is unique.
    pub fn register(&self, version: WorkflowVersion) -> Result<(), ConductorError> {
        parse_semver(&version.version)?;
        if version.phases.is_empty() {
            return Err(ConductorError::InvalidConfig(format!(
                "workflow '{}@{}' has no phases",
                version.workflow_id, version.version
            )));
        }
        let key = (version.workflow_id.clone(), version.version.clone());
        let mut versions = self.versions.lock();
        if versions.contains_key(&key) {
            return Err(ConductorError::VersionExists {
                workflow_id: key.0,
                version: key.1,
            });
        }
        tracing::info!(
            workflow_id = %version.workflow_id,
            version = %version.version,
            breaking = version.breaking_changes,
            "Workflow version registered"
        );
        versions.insert(key, version);
        Ok(())
    }

    pub fn get(&self, workflow_id: &str, version: &str) -> Option<WorkflowVersion> {
        self.versions
            .lock()
            .get(&(workflow_id.to_string(), version.to_string()))
            .cloned()
    }

    /// Highest registered version of a workflow by semver order.
    pub fn latest(&self, workflow_id: &str) -> Option<WorkflowVersion> {
        self.versions
            .lock()
            .values()
            .filter(|v| v.workflow_id == workflow_id)
            .max_by_key(|v| parse_semver(&v.version).unwrap_or((0, 0, 0)))
            .cloned()
    }

    /// Can a run sitting on `current_phase` move from `current` to `target`?
    pub fn check_compatibility(
        current: &WorkflowVersion,
        target: &WorkflowVersion,
        current_phase: Option<Phase>,
    ) -> CompatibilityReport {
        let mut blockers = Vec::new();
        if target.breaking_changes {
            blockers.push(format!(
                "target version {} carries breaking changes",
                target.version
            ));
        }
        for phase in &current.phases {
            if !target.phases.contains(phase) {
                blockers.push(format!("phase {phase} removed in target"));
            }
        }
        if let Some(phase) = current_phase {
            if !target.phases.contains(&phase) {
                blockers.push(format!("run's current phase {phase} missing in target"));
            }
        }
        CompatibilityReport {
            can_upgrade_mid_run: blockers.is_empty(),
            blockers,
        }
    }

    /// Upgrade a run to `target_version`, executing `steps` in order. On a
    /// step failure, previously applied steps roll back in reverse and the
    /// run keeps its current pin.
    pub async fn upgrade_run(
        &self,
        run_id: &str,
        target_version: &str,
        steps: &[Arc<dyn MigrationStep>],
    ) -> Result<UpgradeReport, ConductorError> {
        let mut run = self
            .run_store
            .get(run_id)
            .await?
            .ok_or_else(|| ConductorError::RunNotFound(run_id.to_string()))?;

        let current = self
            .get(&run.workflow_id, &run.workflow_version)
            .ok_or_else(|| ConductorError::VersionNotFound {
                workflow_id: run.workflow_id.clone(),
                version: run.workflow_version.clone(),
            })?;
        let target = self.get(&run.workflow_id, target_version).ok_or_else(|| {
            ConductorError::VersionNotFound {
                workflow_id: run.workflow_id.clone(),
                version: target_version.to_string(),
            }
        })?;

        let report = Self::check_compatibility(&current, &target, run.current_phase);
        if !report.can_upgrade_mid_run {
            return Err(ConductorError::UpgradeIncompatible {
                blockers: report.blockers,
            });
        }

        self.emit(
            EventTopic::UpgradeStarted,
            serde_json::json!({
                "run_id": run_id,
                "from": current.version,
                "to": target.version,
            }),
        )
        .await;

        let mut applied: Vec<&Arc<dyn MigrationStep>> = Vec::new();
        for step in steps {
            match step.apply().await {
                Ok(()) => {
                    tracing::info!(
                        run_id = %run_id,
                        step = step.description(),
                        "Migration step applied"
                    );
                    self.emit(
                        EventTopic::UpgradeStepCompleted,
                        serde_json::json!({
                            "run_id": run_id,
                            "step": step.description(),
                            "safe": step.safe(),
                        }),
                    )
                    .await;
                    applied.push(step);
                }
                Err(e) => {
                    tracing::error!(
                        run_id = %run_id,
                        step = step.description(),
                        error = %e,
                        "Migration step failed; rolling back"
                    );
                    for done in applied.iter().rev() {
                        if let Err(rollback_err) = done.rollback().await {
                            // Keep unwinding; a stuck rollback is for the
                            // operator, not a reason to leave later steps
                            // applied
                            tracing::error!(
                                run_id = %run_id,
                                step = done.description(),
                                error = %rollback_err,
                                "Rollback step failed"
                            );
                        }
                    }
                    self.emit(
                        EventTopic::UpgradeFailed,
                        serde_json::json!({
                            "run_id": run_id,
                            "step": step.description(),
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                    return Err(ConductorError::MigrationFailed {
                        step: step.description().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let from_version = run.workflow_version.clone();
        run.workflow_version = target.version.clone();
        self.run_store.update(&run).await?;

        self.emit(
            EventTopic::UpgradeCompleted,
            serde_json::json!({
                "run_id": run_id,
                "from": from_version,
                "to": target.version,
                "steps": steps.len(),
            }),
        )
        .await;

        Ok(UpgradeReport {
            run_id: run_id.to_string(),
            from_version,
            to_version: target.version,
            steps_applied: steps.len(),
        })
    }

    async fn emit(&self, topic: EventTopic, payload: serde_json::Value) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.publish(BusEvent::new(topic, payload)).await;
        }
    }
}
