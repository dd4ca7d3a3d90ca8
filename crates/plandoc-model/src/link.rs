//! Typed links between entities

use crate::record::new_entity_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relation carried by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum RelationType {
    Implements,
    Addresses,
    DependsOn,
    Blocks,
    AlternativeTo,
    Supersedes,
    References,
    DerivedFrom,
    HasArtifact,
    PartOf,
}

impl RelationType {
    /// Wire name (`depends_on`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implements => "implements",
            Self::Addresses => "addresses",
            Self::DependsOn => "depends_on",
            Self::Blocks => "blocks",
            Self::AlternativeTo => "alternative_to",
            Self::Supersedes => "supersedes",
            Self::References => "references",
            Self::DerivedFrom => "derived_from",
            Self::HasArtifact => "has_artifact",
            Self::PartOf => "part_of",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied part of a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkData {
    /// Entity the link starts at
    pub source_id: String,
    /// Entity the link points to
    pub target_id: String,
    /// Relation kind
    pub relation_type: RelationType,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LinkData {
    /// Link data without metadata
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            metadata: None,
        }
    }
}

/// Persisted link record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Stable identifier
    pub id: String,
    /// Endpoints, relation and metadata
    #[serde(flatten)]
    pub data: LinkData,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Who created the link
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn default_created_by() -> String {
    "system".to_string()
}

impl Link {
    /// Fresh link with a generated id
    #[must_use]
    pub fn new(data: LinkData) -> Self {
        Self {
            id: new_entity_id(),
            data,
            created_at: Utc::now(),
            created_by: default_created_by(),
        }
    }

    /// Source entity id
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.data.source_id
    }

    /// Target entity id
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.data.target_id
    }

    /// Relation kind
    #[inline]
    #[must_use]
    pub fn relation_type(&self) -> RelationType {
        self.data.relation_type
    }

    /// Whether the link touches `entity_id` on either end
    #[inline]
    #[must_use]
    pub fn touches(&self, entity_id: &str) -> bool {
        self.data.source_id == entity_id || self.data.target_id == entity_id
    }

    /// Same endpoints and relation as `other`
    #[must_use]
    pub fn same_edge(&self, other: &LinkData) -> bool {
        self.data.source_id == other.source_id
            && self.data.target_id == other.target_id
            && self.data.relation_type == other.relation_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_serializes_flat() {
        let link = Link::new(LinkData::new("s", "t", RelationType::DependsOn));
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["sourceId"], "s");
        assert_eq!(json["relationType"], "depends_on");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn same_edge_ignores_metadata() {
        let link = Link::new(LinkData::new("s", "t", RelationType::Blocks));
        let mut other = LinkData::new("s", "t", RelationType::Blocks);
        other.metadata = Some(serde_json::json!({"weight": 2}));
        assert!(link.same_edge(&other));
        assert!(!link.same_edge(&LinkData::new("t", "s", RelationType::Blocks)));
        assert!(link.touches("t"));
    }
}
