//! Entity kinds and their collection names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity collections owned by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Something the plan must satisfy
    Requirement,
    /// A proposed way of addressing requirements
    Solution,
    /// A recorded architectural decision
    Decision,
    /// A unit of scheduled work, possibly nested
    Phase,
    /// A generated output (code, config, docs)
    Artifact,
}

impl EntityKind {
    /// Every kind, in manifest order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Requirement,
        EntityKind::Solution,
        EntityKind::Decision,
        EntityKind::Phase,
        EntityKind::Artifact,
    ];

    /// Singular wire name (`requirement`)
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Solution => "solution",
            Self::Decision => "decision",
            Self::Phase => "phase",
            Self::Artifact => "artifact",
        }
    }

    /// Collection file stem under `entities/` (`requirements`)
    #[inline]
    #[must_use]
    pub fn collection_name(self) -> &'static str {
        match self {
            Self::Requirement => "requirements",
            Self::Solution => "solutions",
            Self::Decision => "decisions",
            Self::Phase => "phases",
            Self::Artifact => "artifacts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown or empty entity kind name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: '{0}'")]
pub struct ParseKindError(pub String);

impl FromStr for EntityKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "requirement" | "requirements" => Ok(Self::Requirement),
            "solution" | "solutions" => Ok(Self::Solution),
            "decision" | "decisions" => Ok(Self::Decision),
            "phase" | "phases" => Ok(Self::Phase),
            "artifact" | "artifacts" => Ok(Self::Artifact),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
            assert_eq!(kind.collection_name().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn empty_kind_is_rejected() {
        assert_eq!("".parse::<EntityKind>(), Err(ParseKindError(String::new())));
        assert!("link".parse::<EntityKind>().is_err());
    }
}
