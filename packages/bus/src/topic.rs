//! Shipwright-Bus: Event Topics
//!
//! The closed set of topics the control plane publishes and consumes.
//! Callers match exhaustively; adding a topic is an API change.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Every topic the core emits or subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    // Phase completions, in pipeline order
    IntakeReady,
    IdeationReady,
    CritiqueReady,
    PrdReady,
    BizdevReady,
    ArchReady,
    BuildReady,
    StoryDone,
    QaReady,
    AestheticReady,
    ReleaseReady,
    BetaReady,

    // Waiver lifecycle
    WaiverRequested,
    WaiverApproved,
    WaiverRevoked,
    WaiverExpired,

    // Autoscaler
    ScalingCompleted,
    ScalingFailed,
    PoolScaledUp,
    PoolScaledDown,
    WorkerReady,
    WorkerTerminated,

    // Mid-run workflow upgrades
    UpgradeStarted,
    UpgradeStepCompleted,
    UpgradeCompleted,
    UpgradeFailed,

    // Knowledge-map deltas
    KmapDeltaCreated,
    KmapDeltaUpdated,
    KmapDeltaSuperseded,
    KmapDeltaConflict,
}

impl EventTopic {
    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntakeReady => "intake.ready",
            Self::IdeationReady => "ideation.ready",
            Self::CritiqueReady => "critique.ready",
            Self::PrdReady => "prd.ready",
            Self::BizdevReady => "bizdev.ready",
            Self::ArchReady => "arch.ready",
            Self::BuildReady => "build.ready",
            Self::StoryDone => "story.done",
            Self::QaReady => "qa.ready",
            Self::AestheticReady => "aesthetic.ready",
            Self::ReleaseReady => "release.ready",
            Self::BetaReady => "beta.ready",
            Self::WaiverRequested => "waiver.requested",
            Self::WaiverApproved => "waiver.approved",
            Self::WaiverRevoked => "waiver.revoked",
            Self::WaiverExpired => "waiver.expired",
            Self::ScalingCompleted => "scaling.completed",
            Self::ScalingFailed => "scaling.failed",
            Self::PoolScaledUp => "pool.scaled_up",
            Self::PoolScaledDown => "pool.scaled_down",
            Self::WorkerReady => "worker.ready",
            Self::WorkerTerminated => "worker.terminated",
            Self::UpgradeStarted => "upgrade.started",
            Self::UpgradeStepCompleted => "upgrade.step.completed",
            Self::UpgradeCompleted => "upgrade.completed",
            Self::UpgradeFailed => "upgrade.failed",
            Self::KmapDeltaCreated => "kmap.delta.created",
            Self::KmapDeltaUpdated => "kmap.delta.updated",
            Self::KmapDeltaSuperseded => "kmap.delta.superseded",
            Self::KmapDeltaConflict => "kmap.delta.conflict",
        }
    }

    /// All topics, for subscription sweeps and exhaustiveness tests.
    pub fn all() -> &'static [EventTopic] {
        &[
            Self::IntakeReady,
            Self::IdeationReady,
            Self::CritiqueReady,
            Self::PrdReady,
            Self::BizdevReady,
            Self::ArchReady,
            Self::BuildReady,
            Self::StoryDone,
            Self::QaReady,
            Self::AestheticReady,
            Self::ReleaseReady,
            Self::BetaReady,
            Self::WaiverRequested,
            Self::WaiverApproved,
            Self::WaiverRevoked,
            Self::WaiverExpired,
            Self::ScalingCompleted,
            Self::ScalingFailed,
            Self::PoolScaledUp,
            Self::PoolScaledDown,
            Self::WorkerReady,
            Self::WorkerTerminated,
            Self::UpgradeStarted,
            Self::UpgradeStepCompleted,
            Self::UpgradeCompleted,
            Self::UpgradeFailed,
            Self::KmapDeltaCreated,
            Self::KmapDeltaUpdated,
            Self::KmapDeltaSuperseded,
            Self::KmapDeltaConflict,
        ]
    }

    /// Is this one of the per-phase completion topics?
    pub fn is_phase_completion(&self) -> bool {
        matches!(
            self,
            Self::IntakeReady
                | Self::IdeationReady
                | Self::CritiqueReady
                | Self::PrdReady
                | Self::BizdevReady
                | Self::ArchReady
                | Self::BuildReady
                | Self::StoryDone
                | Self::QaReady
                | Self::AestheticReady
                | Self::ReleaseReady
                | Self::BetaReady
        )
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventTopic {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| BusError::UnknownTopic(s.to_string()))
    }
}

impl Serialize for EventTopic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventTopic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TopicVisitor;

        impl Visitor<'_> for TopicVisitor {
            type Value = EventTopic;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a known event topic name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<EventTopic, E> {
                v.parse().map_err(|_| E::custom(format!("unknown topic '{v}'")))
            }
        }

        deserializer.deserialize_str(TopicVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_topics() {
        for topic in EventTopic::all() {
            let parsed: EventTopic = topic.as_str().parse().unwrap();
            assert_eq!(parsed, *topic);
        }
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let err = "nope.ready".parse::<EventTopic>();
        assert!(matches!(err, Err(BusError::UnknownTopic(_))));
    }

    #[test]
    fn test_phase_completion_classification() {
        assert!(EventTopic::StoryDone.is_phase_completion());
        assert!(!EventTopic::WaiverExpired.is_phase_completion());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&EventTopic::PoolScaledUp).unwrap();
        assert_eq!(json, "\"pool.scaled_up\"");
        let back: EventTopic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventTopic::PoolScaledUp);
    }
}
