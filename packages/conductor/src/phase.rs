//! Shipwright-Conductor: Pipeline Phases
//!
//! The fixed phase order and the per-phase configuration table. Phase
//! attributes (budgets, gate class, retries) are data with config overrides;
//! the order itself is canonical and not configurable.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use shipwright_bus::EventTopic;

use crate::error::ConductorError;

/// Pipeline phases, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Intake,
    Ideation,
    Critique,
    Prd,
    Bizdev,
    Arch,
    Build,
    StoryLoop,
    Qa,
    Aesthetic,
    Release,
    Beta,
}

impl Phase {
    /// Canonical advancement order.
    pub const ORDER: [Phase; 12] = [
        Phase::Intake,
        Phase::Ideation,
        Phase::Critique,
        Phase::Prd,
        Phase::Bizdev,
        Phase::Arch,
        Phase::Build,
        Phase::StoryLoop,
        Phase::Qa,
        Phase::Aesthetic,
        Phase::Release,
        Phase::Beta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Ideation => "IDEATION",
            Self::Critique => "CRITIQUE",
            Self::Prd => "PRD",
            Self::Bizdev => "BIZDEV",
            Self::Arch => "ARCH",
            Self::Build => "BUILD",
            Self::StoryLoop => "STORY_LOOP",
            Self::Qa => "QA",
            Self::Aesthetic => "AESTHETIC",
            Self::Release => "RELEASE",
            Self::Beta => "BETA",
        }
    }

    /// The phase after this one, if any.
    pub fn next(&self) -> Option<Phase> {
        let index = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(index + 1).copied()
    }

    /// First phase of the pipeline.
    pub fn first() -> Phase {
        Self::ORDER[0]
    }

    /// Topic announced when this phase completes.
    pub fn completion_topic(&self) -> EventTopic {
        match self {
            Self::Intake => EventTopic::IntakeReady,
            Self::Ideation => EventTopic::IdeationReady,
            Self::Critique => EventTopic::CritiqueReady,
            Self::Prd => EventTopic::PrdReady,
            Self::Bizdev => EventTopic::BizdevReady,
            Self::Arch => EventTopic::ArchReady,
            Self::Build => EventTopic::BuildReady,
            Self::StoryLoop => EventTopic::StoryDone,
            Self::Qa => EventTopic::QaReady,
            Self::Aesthetic => EventTopic::AestheticReady,
            Self::Release => EventTopic::ReleaseReady,
            Self::Beta => EventTopic::BetaReady,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| ConductorError::InvalidConfig(format!("unknown phase '{s}'")))
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PhaseVisitor;

        impl Visitor<'_> for PhaseVisitor {
            type Value = Phase;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a pipeline phase name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Phase, E> {
                v.parse().map_err(|_| E::custom(format!("unknown phase '{v}'")))
            }
        }

        deserializer.deserialize_str(PhaseVisitor)
    }
}

/// Spend cap for one phase of one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseBudget {
    pub usd: f64,
    pub tokens: u64,
}

/// Per-phase execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub phase: Phase,
    pub budget: PhaseBudget,
    /// Minimum agents that must contribute to the phase
    pub min_agents: u32,
    /// Concurrent agent/tool invocations allowed within the phase
    pub max_concurrency: u32,
    /// Gate class evaluated after the phase body; None advances unguarded
    pub gate: Option<String>,
    pub max_gate_retries: u32,
    pub auto_fix_on_gate_fail: bool,
}

impl PhaseConfig {
    fn standard(
        phase: Phase,
        usd: f64,
        tokens: u64,
        min_agents: u32,
        max_concurrency: u32,
        gate: Option<&str>,
    ) -> Self {
        Self {
            phase,
            budget: PhaseBudget { usd, tokens },
            min_agents,
            max_concurrency,
            gate: gate.map(str::to_string),
            max_gate_retries: 3,
            auto_fix_on_gate_fail: true,
        }
    }
}

/// The full phase configuration table.
#[derive(Debug, Clone)]
pub struct PhaseTable {
    configs: HashMap<Phase, PhaseConfig>,
}

impl PhaseTable {
    /// Defaults for every phase. Values here are starting points; production
    /// deployments override them through the pipeline config.
    pub fn standard() -> Self {
        let mut configs = HashMap::new();
        for config in [
            PhaseConfig::standard(Phase::Intake, 2.0, 200_000, 1, 2, None),
            PhaseConfig::standard(Phase::Ideation, 5.0, 500_000, 2, 4, None),
            PhaseConfig::standard(Phase::Critique, 4.0, 400_000, 2, 4, Some("critique_gate")),
            PhaseConfig::standard(Phase::Prd, 6.0, 600_000, 2, 3, Some("prd_gate")),
            PhaseConfig::standard(Phase::Bizdev, 4.0, 400_000, 1, 2, Some("bizdev_gate")),
            PhaseConfig::standard(Phase::Arch, 8.0, 800_000, 2, 3, Some("design_gate")),
            PhaseConfig::standard(Phase::Build, 20.0, 2_000_000, 3, 8, Some("build_gate")),
            PhaseConfig::standard(Phase::StoryLoop, 30.0, 3_000_000, 3, 8, Some("story_gate")),
            PhaseConfig::standard(Phase::Qa, 10.0, 1_000_000, 2, 6, Some("qa_gate")),
            PhaseConfig::standard(Phase::Aesthetic, 4.0, 400_000, 1, 2, Some("aesthetic_gate")),
            PhaseConfig::standard(Phase::Release, 3.0, 300_000, 1, 2, Some("release_gate")),
            PhaseConfig::standard(Phase::Beta, 2.0, 200_000, 1, 2, None),
        ] {
            configs.insert(config.phase, config);
        }
        Self { configs }
    }

    /// Replace one phase's configuration.
    pub fn with_config(mut self, config: PhaseConfig) -> Self {
        self.configs.insert(config.phase, config);
        self
    }

    pub fn get(&self, phase: Phase) -> &PhaseConfig {
        self.configs
            .get(&phase)
            .expect("standard table covers every phase")
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self::standard()
    }
}
