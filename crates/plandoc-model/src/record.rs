//! Versioned record envelope shared by every entity kind

use crate::kind::EntityKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Generate a fresh entity identifier
#[inline]
#[must_use]
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Kind-specific payload carried by a [`Record`]
pub trait EntityData:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Collection this payload belongs to
    const KIND: EntityKind;
}

/// What the repository layer needs from a persisted record
///
/// Implemented for every [`Record<D>`]; the version counter drives
/// optimistic concurrency in updates.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection this entity is stored in
    const KIND: EntityKind;

    /// Stable identifier
    fn id(&self) -> &str;

    /// Optimistic concurrency version (starts at 1)
    fn version(&self) -> u64;

    /// Overwrite the version counter
    fn set_version(&mut self, version: u64);

    /// Mark the entity as modified at `at`
    fn touch(&mut self, at: DateTime<Utc>);
}

/// Free-form bookkeeping attached to every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    /// Who created the entity
    #[serde(default = "default_created_by")]
    pub created_by: String,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary annotations written by collaborators
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

fn default_created_by() -> String {
    "system".to_string()
}

impl Default for EntityMetadata {
    fn default() -> Self {
        Self {
            created_by: default_created_by(),
            tags: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Versioned envelope around kind data
///
/// Serialized flat: the envelope fields sit next to the kind fields in
/// one JSON object, with `type` naming the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "D: EntityData")]
pub struct Record<D: EntityData> {
    /// Stable identifier
    pub id: String,
    /// Kind tag, always `D::KIND`
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Optimistic concurrency version
    pub version: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
    /// Bookkeeping metadata
    #[serde(default)]
    pub metadata: EntityMetadata,
    /// Kind-specific fields
    #[serde(flatten)]
    pub data: D,
}

impl<D: EntityData> Record<D> {
    /// Wrap `data` in a fresh record with a generated id and version 1
    #[must_use]
    pub fn new(data: D) -> Self {
        Self::with_id(new_entity_id(), data)
    }

    /// Wrap `data` in a fresh record with a caller-chosen id
    #[must_use]
    pub fn with_id(id: impl Into<String>, data: D) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: D::KIND,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: EntityMetadata::default(),
            data,
        }
    }

    /// Replace metadata
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: EntityMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl<D: EntityData> Entity for Record<D> {
    const KIND: EntityKind = D::KIND;

    #[inline]
    fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[inline]
    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}
