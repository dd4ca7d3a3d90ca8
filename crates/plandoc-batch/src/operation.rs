//! Batch input and output types
//!
//! Input is a list of operations tagged by entity type:
//!
//! ```json
//! [
//!   {"entityType": "requirement", "payload": {"tempId": "$0", "title": "Offline mode"}},
//!   {"entityType": "solution", "payload": {"tempId": "$1", "title": "Local cache", "addressing": ["$0"]}},
//!   {"entityType": "link", "payload": {"sourceId": "$1", "targetId": "$0", "relationType": "implements"}}
//! ]
//! ```

use plandoc_model::{
    ArtifactData, DecisionData, EntityKind, IdBearing, IdRef, IdRefMut, LinkData, PhaseData,
    RequirementData, SolutionData,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload with an optional temp id declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload<D> {
    /// `$<integer>` name later operations may use in id fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    /// Entity fields
    #[serde(flatten)]
    pub data: D,
}

impl<D> BatchPayload<D> {
    /// Payload without a temp id
    pub fn new(data: D) -> Self {
        Self { temp_id: None, data }
    }

    /// Payload declaring `temp_id`
    pub fn with_temp_id(temp_id: impl Into<String>, data: D) -> Self {
        Self {
            temp_id: Some(temp_id.into()),
            data,
        }
    }
}

/// One create operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "payload", rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum BatchOperation {
    Requirement(BatchPayload<RequirementData>),
    Solution(BatchPayload<SolutionData>),
    Decision(BatchPayload<DecisionData>),
    Phase(BatchPayload<PhaseData>),
    Artifact(BatchPayload<ArtifactData>),
    Link(BatchPayload<LinkData>),
}

/// Resolved operation handed to a backend
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Draft {
    Requirement(RequirementData),
    Solution(SolutionData),
    Decision(DecisionData),
    Phase(PhaseData),
    Artifact(ArtifactData),
    Link(LinkData),
}

/// Entity collection of a variant; links have none
macro_rules! kind_of {
    ($ty:ident, $value:expr) => {
        match $value {
            $ty::Requirement(_) => Some(EntityKind::Requirement),
            $ty::Solution(_) => Some(EntityKind::Solution),
            $ty::Decision(_) => Some(EntityKind::Decision),
            $ty::Phase(_) => Some(EntityKind::Phase),
            $ty::Artifact(_) => Some(EntityKind::Artifact),
            $ty::Link(_) => None,
        }
    };
}

fn wire_name(kind: Option<EntityKind>) -> &'static str {
    kind.map_or("link", EntityKind::as_str)
}

impl Draft {
    /// Entity collection, `None` for a link
    #[must_use]
    pub fn kind(&self) -> Option<EntityKind> {
        kind_of!(Draft, self)
    }

    /// Entity type name as it appears on the wire
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        wire_name(self.kind())
    }

    /// Identifier values in id-bearing fields
    #[must_use]
    pub fn id_refs(&self) -> Vec<IdRef<'_>> {
        match self {
            Self::Requirement(d) => d.id_refs(),
            Self::Solution(d) => d.id_refs(),
            Self::Decision(d) => d.id_refs(),
            Self::Phase(d) => d.id_refs(),
            Self::Artifact(d) => d.id_refs(),
            Self::Link(d) => d.id_refs(),
        }
    }
}

macro_rules! each_variant {
    ($value:expr, $payload:ident => $body:expr) => {
        match $value {
            BatchOperation::Requirement($payload) => $body,
            BatchOperation::Solution($payload) => $body,
            BatchOperation::Decision($payload) => $body,
            BatchOperation::Phase($payload) => $body,
            BatchOperation::Artifact($payload) => $body,
            BatchOperation::Link($payload) => $body,
        }
    };
}

impl BatchOperation {
    /// Entity collection, `None` for a link
    #[must_use]
    pub fn kind(&self) -> Option<EntityKind> {
        kind_of!(BatchOperation, self)
    }

    /// Entity type name as it appears on the wire
    #[must_use]
    pub fn entity_type(&self) -> &'static str {
        wire_name(self.kind())
    }

    /// Declared temp id
    #[must_use]
    pub fn temp_id(&self) -> Option<&str> {
        each_variant!(self, p => p.temp_id.as_deref())
    }

    /// Identifier values in id-bearing fields
    #[must_use]
    pub fn id_refs(&self) -> Vec<IdRef<'_>> {
        each_variant!(self, p => p.data.id_refs())
    }

    /// Identifier slots, for rewriting temp ids
    pub fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        each_variant!(self, p => p.data.id_refs_mut())
    }

    /// Split into the temp id declaration and the backend draft
    #[must_use]
    pub fn into_draft(self) -> (Option<String>, Draft) {
        match self {
            Self::Requirement(p) => (p.temp_id, Draft::Requirement(p.data)),
            Self::Solution(p) => (p.temp_id, Draft::Solution(p.data)),
            Self::Decision(p) => (p.temp_id, Draft::Decision(p.data)),
            Self::Phase(p) => (p.temp_id, Draft::Phase(p.data)),
            Self::Artifact(p) => (p.temp_id, Draft::Artifact(p.data)),
            Self::Link(p) => (p.temp_id, Draft::Link(p.data)),
        }
    }
}

/// Options for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// All-or-nothing: roll every collection back on the first failure
    pub atomic: bool,
}

impl BatchOptions {
    /// All-or-nothing options
    #[inline]
    #[must_use]
    pub fn atomic() -> Self {
        Self { atomic: true }
    }
}

/// Failure of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// Wire code
    pub code: String,
    /// Human readable reason
    pub message: String,
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperationResult {
    /// Position in the input
    pub index: usize,
    /// Entity type of the operation
    pub entity_type: String,
    /// Whether the operation persisted
    pub success: bool,
    /// Generated id on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Temp id the operation declared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    /// Failure on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// One entry per operation, in input order
    pub results: Vec<BatchOperationResult>,
    /// Temp id to generated id
    pub temp_id_mapping: BTreeMap<String, String>,
}

impl BatchResult {
    /// Operations that persisted
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Operations that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Generated id for `temp_id`
    #[must_use]
    pub fn resolve(&self, temp_id: &str) -> Option<&str> {
        self.temp_id_mapping.get(temp_id).map(String::as_str)
    }
}
