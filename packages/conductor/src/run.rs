//! Shipwright-Conductor: Run Model & Store
//!
//! A run is one journey through the pipeline: identifier, version pin, shard
//! binding, phase cursor, opaque context, and lifecycle status. The store
//! contract mirrors the `runs` table; the in-memory implementation backs
//! tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConductorError;
use crate::phase::Phase;

/// Run lifecycle. The public projection is
/// pending -> running -> {completed, failed, aborted}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Can this run still make progress?
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

/// One pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    /// Pinned workflow version (semver)
    pub workflow_version: String,
    /// Phase currently being (or last) executed; None before the first
    pub current_phase: Option<Phase>,
    pub status: RunStatus,
    pub shard_id: String,
    /// Opaque key -> value context carried across phases
    pub context: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_version: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("run-{}", Uuid::new_v4()),
            workflow_id: workflow_id.into(),
            workflow_version: workflow_version.into(),
            current_phase: None,
            status: RunStatus::Created,
            shard_id: shard_id.into(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Storage contract for runs. Each mutation is one statement.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: Run) -> Result<(), ConductorError>;
    async fn get(&self, run_id: &str) -> Result<Option<Run>, ConductorError>;
    async fn update(&self, run: &Run) -> Result<(), ConductorError>;
}

/// In-memory reference store.
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: Run) -> Result<(), ConductorError> {
        self.runs.write().insert(run.id.clone(), run);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, ConductorError> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    async fn update(&self, run: &Run) -> Result<(), ConductorError> {
        let mut runs = self.runs.write();
        if !runs.contains_key(&run.id) {
            return Err(ConductorError::RunNotFound(run.id.clone()));
        }
        let mut updated = run.clone();
        updated.updated_at = Utc::now();
        runs.insert(run.id.clone(), updated);
        Ok(())
    }
}
