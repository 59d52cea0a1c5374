//! Shipwright-Toolkit: Capability Classes
//!
//! Closed enum of fine-grained capability verbs. Used both to index the tool
//! registry and to classify what an agent is asking for, so the two sides
//! can never drift apart.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::tool::ToolkitError;

/// What a tool can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityClass {
    IntakeNormalizer,
    IntakeResearch,
    IdeationBrainstorm,
    IdeationCluster,
    CritiqueReview,
    PrdAuthor,
    PrdValidate,
    BizdevModel,
    ArchDesign,
    ArchReview,
    BuildScaffold,
    CodeGenerate,
    CodeReview,
    CodeRepair,
    QaUnit,
    QaE2e,
    SecurityScan,
    AestheticReview,
    ReleasePackage,
    BetaFeedback,
}

impl CapabilityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntakeNormalizer => "intake.normalizer",
            Self::IntakeResearch => "intake.research",
            Self::IdeationBrainstorm => "ideation.brainstorm",
            Self::IdeationCluster => "ideation.cluster",
            Self::CritiqueReview => "critique.review",
            Self::PrdAuthor => "prd.author",
            Self::PrdValidate => "prd.validate",
            Self::BizdevModel => "bizdev.model",
            Self::ArchDesign => "arch.design",
            Self::ArchReview => "arch.review",
            Self::BuildScaffold => "build.scaffold",
            Self::CodeGenerate => "code.generate",
            Self::CodeReview => "code.review",
            Self::CodeRepair => "code.repair",
            Self::QaUnit => "qa.unit",
            Self::QaE2e => "qa.e2e",
            Self::SecurityScan => "security.scan",
            Self::AestheticReview => "aesthetic.review",
            Self::ReleasePackage => "release.package",
            Self::BetaFeedback => "beta.feedback",
        }
    }

    /// Coarse grouping; the verb's first segment.
    pub fn category(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }

    pub fn all() -> &'static [CapabilityClass] {
        &[
            Self::IntakeNormalizer,
            Self::IntakeResearch,
            Self::IdeationBrainstorm,
            Self::IdeationCluster,
            Self::CritiqueReview,
            Self::PrdAuthor,
            Self::PrdValidate,
            Self::BizdevModel,
            Self::ArchDesign,
            Self::ArchReview,
            Self::BuildScaffold,
            Self::CodeGenerate,
            Self::CodeReview,
            Self::CodeRepair,
            Self::QaUnit,
            Self::QaE2e,
            Self::SecurityScan,
            Self::AestheticReview,
            Self::ReleasePackage,
            Self::BetaFeedback,
        ]
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityClass {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| ToolkitError::UnknownCapability(s.to_string()))
    }
}

impl Serialize for CapabilityClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CapabilityClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CapabilityVisitor;

        impl Visitor<'_> for CapabilityVisitor {
            type Value = CapabilityClass;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a known capability class")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CapabilityClass, E> {
                v.parse()
                    .map_err(|_| E::custom(format!("unknown capability '{v}'")))
            }
        }

        deserializer.deserialize_str(CapabilityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_capabilities() {
        for capability in CapabilityClass::all() {
            let parsed: CapabilityClass = capability.as_str().parse().unwrap();
            assert_eq!(parsed, *capability);
        }
    }

    #[test]
    fn test_category() {
        assert_eq!(CapabilityClass::QaE2e.category(), "qa");
        assert_eq!(CapabilityClass::IntakeNormalizer.category(), "intake");
    }

    #[test]
    fn test_unknown_capability() {
        assert!("qa.quantum".parse::<CapabilityClass>().is_err());
    }
}
