//! On-disk layout of a store root
//!
//! ```text
//! <root>/active-plans.json
//! <root>/.locks/<encoded-resource>.lock
//! <root>/plans/<planId>/manifest.json
//! <root>/plans/<planId>/entities/<collection>.json
//! <root>/plans/<planId>/links.json
//! <root>/plans/<planId>/history/<collection>/<entityId>.json
//! ```

use crate::error::{StoreError, StoreResult};
use plandoc_model::EntityKind;
use std::path::{Path, PathBuf};

/// Path helpers for one store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock artifact directory
    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    /// Active plan mapping
    #[must_use]
    pub fn active_plans_file(&self) -> PathBuf {
        self.root.join("active-plans.json")
    }

    /// Directory holding every plan
    #[must_use]
    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }

    /// Directory of one plan
    #[must_use]
    pub fn plan_dir(&self, plan_id: &str) -> PathBuf {
        self.plans_dir().join(plan_id)
    }

    /// Plan manifest
    #[must_use]
    pub fn manifest_file(&self, plan_id: &str) -> PathBuf {
        self.plan_dir(plan_id).join("manifest.json")
    }

    /// Collection file of one entity kind
    #[must_use]
    pub fn entity_file(&self, plan_id: &str, kind: EntityKind) -> PathBuf {
        self.plan_dir(plan_id)
            .join("entities")
            .join(format!("{}.json", kind.collection_name()))
    }

    /// Link collection file
    #[must_use]
    pub fn links_file(&self, plan_id: &str) -> PathBuf {
        self.plan_dir(plan_id).join("links.json")
    }

    /// History directory of one collection
    #[must_use]
    pub fn history_dir(&self, plan_id: &str, kind: EntityKind) -> PathBuf {
        self.plan_dir(plan_id)
            .join("history")
            .join(kind.collection_name())
    }

    /// Every directory a fresh plan needs
    #[must_use]
    pub fn plan_dirs(&self, plan_id: &str) -> Vec<PathBuf> {
        let dir = self.plan_dir(plan_id);
        vec![
            dir.join("entities"),
            dir.join("history"),
            dir.join("versions"),
            dir.join("exports"),
        ]
    }
}

/// Lock resource name of one collection
#[must_use]
pub fn collection_resource(plan_id: &str, collection: &str) -> String {
    format!("{plan_id}/{collection}")
}

/// Lock resource name of a plan manifest
#[must_use]
pub fn manifest_resource(plan_id: &str) -> String {
    format!("{plan_id}/manifest")
}

/// Lock resource name of the active plan mapping
pub const ACTIVE_PLANS_RESOURCE: &str = "active-plans";

/// Reject ids that are empty or could escape the plans directory
pub fn validate_plan_id(plan_id: &str) -> StoreResult<()> {
    if plan_id.trim().is_empty() {
        return Err(StoreError::validation("plan id must not be empty"));
    }
    if plan_id == "." || plan_id == ".." || plan_id.contains(['/', '\\']) {
        return Err(StoreError::validation(format!(
            "plan id {plan_id:?} must not contain path separators"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_documented_layout() {
        let layout = StoreLayout::new("/data");
        assert_eq!(
            layout.entity_file("p1", EntityKind::Requirement),
            PathBuf::from("/data/plans/p1/entities/requirements.json")
        );
        assert_eq!(layout.links_file("p1"), PathBuf::from("/data/plans/p1/links.json"));
        assert_eq!(layout.lock_dir(), PathBuf::from("/data/.locks"));
        assert_eq!(
            layout.history_dir("p1", EntityKind::Phase),
            PathBuf::from("/data/plans/p1/history/phases")
        );
    }

    #[test]
    fn plan_ids_cannot_traverse() {
        assert!(validate_plan_id("p-1").is_ok());
        assert!(validate_plan_id("").is_err());
        assert!(validate_plan_id("..").is_err());
        assert!(validate_plan_id("a/b").is_err());
    }
}
