//! Full copy of every collection of one plan

use plandoc_model::{Artifact, Decision, EntityKind, Link, Phase, Requirement, Solution};
use serde::{Deserialize, Serialize};

/// Every entity and link of one plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanCollections {
    /// Requirements
    pub requirements: Vec<Requirement>,
    /// Solutions
    pub solutions: Vec<Solution>,
    /// Decisions
    pub decisions: Vec<Decision>,
    /// Phases
    pub phases: Vec<Phase>,
    /// Artifacts
    pub artifacts: Vec<Artifact>,
    /// Links
    pub links: Vec<Link>,
}

impl PlanCollections {
    /// Entities of one kind
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Requirement => self.requirements.len(),
            EntityKind::Solution => self.solutions.len(),
            EntityKind::Decision => self.decisions.len(),
            EntityKind::Phase => self.phases.len(),
            EntityKind::Artifact => self.artifacts.len(),
        }
    }

    /// Entities across all kinds, links excluded
    #[must_use]
    pub fn entity_count(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    /// Kind of the entity with `id`, if any collection holds it
    #[must_use]
    pub fn kind_of(&self, id: &str) -> Option<EntityKind> {
        if self.requirements.iter().any(|e| e.id == id) {
            Some(EntityKind::Requirement)
        } else if self.solutions.iter().any(|e| e.id == id) {
            Some(EntityKind::Solution)
        } else if self.decisions.iter().any(|e| e.id == id) {
            Some(EntityKind::Decision)
        } else if self.phases.iter().any(|e| e.id == id) {
            Some(EntityKind::Phase)
        } else if self.artifacts.iter().any(|e| e.id == id) {
            Some(EntityKind::Artifact)
        } else {
            None
        }
    }
}
