//! Shipwright-Sentinel: Quarantine Roster
//!
//! Actors that keep failing are pulled out of rotation. The roster tracks a
//! persistent failure streak per actor (unlike the circuit breaker's, this
//! one survives circuit transitions) and holds quarantined actors until an
//! operator or unstick routine releases them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One quarantined actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub actor: String,
    pub reason: String,
    /// Failure streak at quarantine time
    pub failures: u32,
    pub quarantined_at: DateTime<Utc>,
}

/// Roster statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QuarantineStats {
    pub quarantined: usize,
    pub actors_with_failures: usize,
}

/// Tracks failure streaks and quarantined actors.
pub struct QuarantineRoster {
    entries: Mutex<HashMap<String, QuarantineEntry>>,
    failure_streaks: Mutex<HashMap<String, u32>>,
}

impl QuarantineRoster {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failure_streaks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_quarantined(&self, actor: &str) -> bool {
        self.entries.lock().contains_key(actor)
    }

    /// Note a failure; returns the actor's current streak.
    pub fn note_failure(&self, actor: &str) -> u32 {
        let mut streaks = self.failure_streaks.lock();
        let streak = streaks.entry(actor.to_string()).or_insert(0);
        *streak += 1;
        *streak
    }

    /// Note a success; resets the streak.
    pub fn note_success(&self, actor: &str) {
        self.failure_streaks.lock().remove(actor);
    }

    /// Place an actor in quarantine.
    pub fn quarantine(&self, actor: &str, reason: impl Into<String>) {
        let failures = self
            .failure_streaks
            .lock()
            .get(actor)
            .copied()
            .unwrap_or(0);
        let reason = reason.into();
        tracing::warn!(actor = %actor, failures, reason = %reason, "Actor quarantined");
        self.entries.lock().insert(
            actor.to_string(),
            QuarantineEntry {
                actor: actor.to_string(),
                reason,
                failures,
                quarantined_at: Utc::now(),
            },
        );
    }

    /// Release an actor. Clears its failure streak too.
    pub fn release(&self, actor: &str) -> Option<QuarantineEntry> {
        self.failure_streaks.lock().remove(actor);
        let released = self.entries.lock().remove(actor);
        if released.is_some() {
            tracing::info!(actor = %actor, "Actor released from quarantine");
        }
        released
    }

    pub fn entry(&self, actor: &str) -> Option<QuarantineEntry> {
        self.entries.lock().get(actor).cloned()
    }

    pub fn quarantined_actors(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> QuarantineStats {
        QuarantineStats {
            quarantined: self.entries.lock().len(),
            actors_with_failures: self.failure_streaks.lock().len(),
        }
    }
}

impl Default for QuarantineRoster {
    fn default() -> Self {
        Self::new()
    }
}
