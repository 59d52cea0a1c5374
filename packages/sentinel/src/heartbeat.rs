//! Shipwright-Sentinel: Heartbeat Monitor
//!
//! Executions register a heartbeat stream; a periodic check marks an
//! execution stuck when the gap since its last beat exceeds the timeout for
//! `max_missed` consecutive observations. The checker loop uses a cancellable
//! ticker that skips missed ticks, so clock jumps produce at most one stale
//! observation instead of a burst.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Heartbeat thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Gap after which an observation counts as missed
    pub timeout_ms: u64,
    /// Consecutive missed observations before an execution is stuck
    pub max_missed: u32,
    /// Checker cadence
    pub check_interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_missed: 3,
            check_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct BeatState {
    started_at: DateTime<Utc>,
    last_beat: DateTime<Utc>,
    missed: u32,
    stuck: bool,
}

/// Read-only view of one execution's heartbeat state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub last_beat: DateTime<Utc>,
    pub missed: u32,
    pub stuck: bool,
}

/// Monitor statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeartbeatStats {
    pub tracked: usize,
    pub stuck: usize,
}

/// Tracks heartbeats per execution id.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    states: Mutex<HashMap<String, BeatState>>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Begin tracking an execution. Resets any prior state for the id.
    pub fn start(&self, execution_id: &str) {
        let now = Utc::now();
        self.states.lock().insert(
            execution_id.to_string(),
            BeatState {
                started_at: now,
                last_beat: now,
                missed: 0,
                stuck: false,
            },
        );
    }

    /// Record a heartbeat. Clears the missed counter and any stuck flag.
    pub fn beat(&self, execution_id: &str) {
        if let Some(state) = self.states.lock().get_mut(execution_id) {
            state.last_beat = Utc::now();
            state.missed = 0;
            if state.stuck {
                tracing::info!(execution_id = %execution_id, "Execution recovered from stuck state");
                state.stuck = false;
            }
        }
    }

    /// Stop tracking an execution (it completed or was torn down).
    pub fn stop(&self, execution_id: &str) {
        self.states.lock().remove(execution_id);
    }

    /// One observation pass. Returns ids that became stuck in this pass.
    pub fn sweep_once(&self) -> Vec<String> {
        let now = Utc::now();
        let timeout = ChronoDuration::milliseconds(self.config.timeout_ms as i64);
        let mut newly_stuck = Vec::new();

        let mut states = self.states.lock();
        for (id, state) in states.iter_mut() {
            if state.stuck {
                continue;
            }
            if now - state.last_beat > timeout {
                state.missed += 1;
                if state.missed >= self.config.max_missed {
                    state.stuck = true;
                    tracing::warn!(
                        execution_id = %id,
                        missed = state.missed,
                        "Execution marked stuck"
                    );
                    newly_stuck.push(id.clone());
                }
            } else {
                state.missed = 0;
            }
        }
        newly_stuck
    }

    /// Checker loop. Invokes `on_stuck` for each newly-stuck execution; exits
    /// when `shutdown` flips to true.
    pub async fn run<F>(&self, mut shutdown: watch::Receiver<bool>, on_stuck: F)
    where
        F: Fn(&str) + Send + Sync,
    {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.config.check_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for id in self.sweep_once() {
                        on_stuck(&id);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Heartbeat checker shutting down");
                        return;
                    }
                }
            }
        }
    }

    pub fn is_stuck(&self, execution_id: &str) -> bool {
        self.states
            .lock()
            .get(execution_id)
            .is_some_and(|s| s.stuck)
    }

    pub fn snapshot(&self, execution_id: &str) -> Option<HeartbeatSnapshot> {
        self.states
            .lock()
            .get(execution_id)
            .map(|s| HeartbeatSnapshot {
                execution_id: execution_id.to_string(),
                started_at: s.started_at,
                last_beat: s.last_beat,
                missed: s.missed,
                stuck: s.stuck,
            })
    }

    pub fn stats(&self) -> HeartbeatStats {
        let states = self.states.lock();
        HeartbeatStats {
            tracked: states.len(),
            stuck: states.values().filter(|s| s.stuck).count(),
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(HeartbeatConfig::default())
    }
}
