//! Shipwright-Gatekeeper: Waiver Manager
//!
//! A waiver lets one specific (run, phase, violation) bypass a gate failure
//! for a bounded time, with an owner, a justification, and a compensating
//! control. Lifecycle: pending -> active -> {expired, revoked}. Status
//! transitions are serialized per manager and happen exactly once; approving
//! anything but a pending waiver is an error.
//!
//! A background sweeper expires stale active waivers and announces it on the
//! bus.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use shipwright_bus::{BusEvent, Dispatcher, EventTopic};

/// Default sweep cadence. The contract caps it at one hour.
pub const SWEEP_INTERVAL_MS: u64 = 600_000;

const DEFAULT_EXPIRY_DAYS: i64 = 30;

/// Gatekeeper errors (waiver side).
#[derive(Debug, Error)]
pub enum GateError {
    #[error("waiver '{0}' not found")]
    WaiverNotFound(Uuid),

    #[error("waiver '{id}' cannot be {action} from status '{from}'")]
    InvalidTransition {
        id: Uuid,
        from: String,
        action: &'static str,
    },
}

/// Waiver lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaiverStatus {
    Pending,
    Active,
    Expired,
    Revoked,
}

impl WaiverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// Request to create a waiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiverRequest {
    pub run_id: String,
    pub phase: String,
    /// Violation this waiver covers (e.g. a failed metric id)
    pub violation_type: String,
    pub violation_details: String,
    pub owner: String,
    pub justification: String,
    /// What keeps the risk bounded while the waiver is active
    pub compensating_control: String,
    /// Pending until approved when true; active immediately otherwise
    pub requires_approval: bool,
    /// Override of the default 30-day expiry
    pub expires_in_hours: Option<i64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A granted (or pending) waiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waiver {
    pub id: Uuid,
    pub run_id: String,
    pub phase: String,
    pub violation_type: String,
    pub violation_details: String,
    pub owner: String,
    pub justification: String,
    pub compensating_control: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub status: WaiverStatus,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Waiver {
    /// Active right now (status and clock both agree).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == WaiverStatus::Active && self.expires_at > now
    }
}

/// Counts by status, plus the near-expiry watchlist.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WaiverStats {
    pub pending: usize,
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
    pub expiring_within_7_days: usize,
}

/// Owns every waiver. One lock serializes all status transitions.
pub struct WaiverManager {
    waivers: Mutex<HashMap<Uuid, Waiver>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl WaiverManager {
    pub fn new() -> Self {
        Self {
            waivers: Mutex::new(HashMap::new()),
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Create a waiver. Pending when approval is required, active otherwise.
    pub async fn request_waiver(&self, request: WaiverRequest) -> Waiver {
        let now = Utc::now();
        let expires_at = now
            + request
                .expires_in_hours
                .map(ChronoDuration::hours)
                .unwrap_or_else(|| ChronoDuration::days(DEFAULT_EXPIRY_DAYS));

        let waiver = Waiver {
            id: Uuid::new_v4(),
            run_id: request.run_id,
            phase: request.phase,
            violation_type: request.violation_type,
            violation_details: request.violation_details,
            owner: request.owner,
            justification: request.justification,
            compensating_control: request.compensating_control,
            approved_by: None,
            approved_at: None,
            created_at: now,
            expires_at,
            revoked_at: None,
            status: if request.requires_approval {
                WaiverStatus::Pending
            } else {
                WaiverStatus::Active
            },
            metadata: request.metadata,
        };

        tracing::info!(
            waiver_id = %waiver.id,
            run_id = %waiver.run_id,
            phase = %waiver.phase,
            violation = %waiver.violation_type,
            status = waiver.status.as_str(),
            "Waiver requested"
        );
        self.waivers.lock().insert(waiver.id, waiver.clone());
        self.emit(EventTopic::WaiverRequested, &waiver).await;
        waiver
    }

    /// Approve a pending waiver. Exactly-once: any other status errors.
    pub async fn approve_waiver(
        &self,
        id: Uuid,
        approver: impl Into<String>,
    ) -> Result<Waiver, GateError> {
        let approved = {
            let mut waivers = self.waivers.lock();
            let waiver = waivers.get_mut(&id).ok_or(GateError::WaiverNotFound(id))?;
            if waiver.status != WaiverStatus::Pending {
                return Err(GateError::InvalidTransition {
                    id,
                    from: waiver.status.as_str().to_string(),
                    action: "approved",
                });
            }
            waiver.status = WaiverStatus::Active;
            waiver.approved_by = Some(approver.into());
            waiver.approved_at = Some(Utc::now());
            waiver.clone()
        };
        tracing::info!(waiver_id = %id, approver = approved.approved_by.as_deref().unwrap_or(""), "Waiver approved");
        self.emit(EventTopic::WaiverApproved, &approved).await;
        Ok(approved)
    }

    /// Revoke an active waiver.
    pub async fn revoke_waiver(
        &self,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Waiver, GateError> {
        let revoked = {
            let mut waivers = self.waivers.lock();
            let waiver = waivers.get_mut(&id).ok_or(GateError::WaiverNotFound(id))?;
            if waiver.status != WaiverStatus::Active {
                return Err(GateError::InvalidTransition {
                    id,
                    from: waiver.status.as_str().to_string(),
                    action: "revoked",
                });
            }
            waiver.status = WaiverStatus::Revoked;
            waiver.revoked_at = Some(Utc::now());
            if let Some(reason) = reason {
                waiver.metadata["revocation_reason"] = serde_json::Value::String(reason);
            }
            waiver.clone()
        };
        tracing::warn!(waiver_id = %id, "Waiver revoked");
        self.emit(EventTopic::WaiverRevoked, &revoked).await;
        Ok(revoked)
    }

    /// Any active, unexpired waiver covering this exact violation.
    pub fn check_waiver(&self, run_id: &str, phase: &str, violation_type: &str) -> Option<Waiver> {
        let now = Utc::now();
        self.waivers
            .lock()
            .values()
            .find(|w| {
                w.run_id == run_id
                    && w.phase == phase
                    && w.violation_type == violation_type
                    && w.is_active(now)
            })
            .cloned()
    }

    /// Fetch by id.
    pub fn get(&self, id: Uuid) -> Option<Waiver> {
        self.waivers.lock().get(&id).cloned()
    }

    /// One sweep pass: expire stale active waivers. Returns what expired.
    pub async fn sweep_expired(&self) -> Vec<Waiver> {
        let now = Utc::now();
        let expired: Vec<Waiver> = {
            let mut waivers = self.waivers.lock();
            waivers
                .values_mut()
                .filter(|w| w.status == WaiverStatus::Active && w.expires_at <= now)
                .map(|w| {
                    w.status = WaiverStatus::Expired;
                    w.clone()
                })
                .collect()
        };
        for waiver in &expired {
            tracing::info!(waiver_id = %waiver.id, "Waiver expired");
            self.emit(EventTopic::WaiverExpired, waiver).await;
        }
        expired
    }

    /// Sweeper loop on a cancellable ticker.
    pub async fn run_sweeper(&self, interval_ms: u64, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_expired().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Waiver sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> WaiverStats {
        let now = Utc::now();
        let soon = now + ChronoDuration::days(7);
        let waivers = self.waivers.lock();
        let mut stats = WaiverStats::default();
        for waiver in waivers.values() {
            match waiver.status {
                WaiverStatus::Pending => stats.pending += 1,
                WaiverStatus::Active => {
                    stats.active += 1;
                    if waiver.expires_at <= soon {
                        stats.expiring_within_7_days += 1;
                    }
                }
                WaiverStatus::Expired => stats.expired += 1,
                WaiverStatus::Revoked => stats.revoked += 1,
            }
        }
        stats
    }

    async fn emit(&self, topic: EventTopic, waiver: &Waiver) {
        if let Some(dispatcher) = &self.dispatcher {
            let payload = serde_json::to_value(waiver).unwrap_or_default();
            dispatcher.publish(BusEvent::new(topic, payload)).await;
        }
    }
}

impl Default for WaiverManager {
    fn default() -> Self {
        Self::new()
    }
}
