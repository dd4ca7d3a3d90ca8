//! Plan manifests and the active-plan mapping

use crate::error::{StoreError, StoreResult};
use crate::factory::RepositoryFactory;
use crate::layout::{manifest_resource, validate_plan_id, ACTIVE_PLANS_RESOURCE};
use chrono::{DateTime, Utc};
use plandoc_lock::AcquireOptions;
use plandoc_model::{new_entity_id, EntityKind, Phase, PhaseStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle of a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum PlanStatus {
    #[default]
    Active,
    Completed,
    Archived,
}

/// Entity counts and progress of one plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanStatistics {
    /// Requirements
    pub total_requirements: usize,
    /// Solutions
    pub total_solutions: usize,
    /// Decisions
    pub total_decisions: usize,
    /// Phases
    pub total_phases: usize,
    /// Artifacts
    pub total_artifacts: usize,
    /// Links
    pub total_links: usize,
    /// Share of completed phases, 0-100
    pub completion_percentage: f64,
}

/// `manifest.json` of one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanManifest {
    /// Plan id
    pub id: String,
    /// Display name
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Lifecycle
    #[serde(default)]
    pub status: PlanStatus,
    /// Who created the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Format version of the plan directory
    pub version: String,
    /// Bumped on every manifest write
    pub lock_version: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last manifest write
    pub updated_at: DateTime<Utc>,
    /// Cached counts
    #[serde(default)]
    pub statistics: PlanStatistics,
}

/// Input for [`PlanStore::create_plan`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPlan {
    /// Display name
    pub name: String,
    /// Free text
    pub description: String,
    /// Creator
    pub author: Option<String>,
}

impl NewPlan {
    /// Plan with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One entry of `active-plans.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePlan {
    /// Active plan of the workspace
    pub plan_id: String,
    /// When it was made active
    pub last_updated: DateTime<Utc>,
}

type ActivePlans = BTreeMap<String, ActivePlan>;

const PLAN_FORMAT_VERSION: &str = "1.0";

/// Plan-level persistence
#[derive(Debug, Clone)]
pub struct PlanStore {
    factory: Arc<RepositoryFactory>,
}

impl PlanStore {
    /// Plan store over the factory's root
    #[must_use]
    pub fn new(factory: Arc<RepositoryFactory>) -> Self {
        Self { factory }
    }

    /// Repository factory
    #[inline]
    #[must_use]
    pub fn factory(&self) -> &Arc<RepositoryFactory> {
        &self.factory
    }

    /// Create the plan directory, empty collections and manifest
    pub async fn create_plan(&self, plan: NewPlan) -> StoreResult<PlanManifest> {
        if plan.name.trim().is_empty() {
            return Err(StoreError::validation("plan name must not be empty"));
        }
        let layout = self.factory.layout();
        let id = new_entity_id();

        for dir in layout.plan_dirs(&id) {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::storage(&dir, e))?;
        }
        let store = self.factory.store();
        let empty: Vec<serde_json::Value> = Vec::new();
        for kind in EntityKind::ALL {
            store.write(&layout.entity_file(&id, kind), &empty).await?;
        }
        store.write(&layout.links_file(&id), &empty).await?;

        let now = Utc::now();
        let manifest = PlanManifest {
            id: id.clone(),
            name: plan.name,
            description: plan.description,
            status: PlanStatus::Active,
            author: plan.author,
            version: PLAN_FORMAT_VERSION.to_string(),
            lock_version: 1,
            created_at: now,
            updated_at: now,
            statistics: PlanStatistics::default(),
        };
        store.write(&layout.manifest_file(&id), &manifest).await?;
        info!(plan_id = %id, name = %manifest.name, "plan created");
        Ok(manifest)
    }

    /// Manifest of `plan_id`
    pub async fn get_plan(&self, plan_id: &str) -> StoreResult<PlanManifest> {
        validate_plan_id(plan_id)?;
        self.factory
            .store()
            .read_optional(&self.factory.layout().manifest_file(plan_id))
            .await?
            .ok_or_else(|| StoreError::not_found("plan", plan_id))
    }

    /// Every readable manifest, newest first
    ///
    /// Plans whose manifest cannot be parsed are skipped with a warning.
    pub async fn list_plans(&self) -> StoreResult<Vec<PlanManifest>> {
        let dir = self.factory.layout().plans_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::storage(&dir, e)),
        };

        let mut plans = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::storage(&dir, e))?
        {
            let Some(plan_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.get_plan(&plan_id).await {
                Ok(manifest) => plans.push(manifest),
                Err(StoreError::NotFound { .. }) => {}
                Err(err) => warn!(plan_id = %plan_id, error = %err, "skipping unreadable plan"),
            }
        }
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    /// Modify a manifest under its lock
    ///
    /// When `expected_lock_version` is given it must match the stored value.
    /// `lockVersion` and `updatedAt` are bumped on every write.
    pub async fn update_plan<F>(
        &self,
        plan_id: &str,
        expected_lock_version: Option<u64>,
        f: F,
    ) -> StoreResult<PlanManifest>
    where
        F: FnOnce(&mut PlanManifest),
    {
        validate_plan_id(plan_id)?;
        let path = self.factory.layout().manifest_file(plan_id);
        self.factory
            .lock_manager()
            .with_lock(&manifest_resource(plan_id), AcquireOptions::new(), || async {
                let mut manifest = self.get_plan(plan_id).await?;
                if let Some(expected) = expected_lock_version {
                    if expected != manifest.lock_version {
                        return Err(StoreError::VersionConflict {
                            id: plan_id.to_string(),
                            expected,
                            actual: manifest.lock_version,
                        });
                    }
                }
                f(&mut manifest);
                manifest.id = plan_id.to_string();
                manifest.lock_version += 1;
                manifest.updated_at = Utc::now();
                self.factory.store().write(&path, &manifest).await?;
                Ok::<_, StoreError>(manifest)
            })
            .await
    }

    /// Remove a plan directory entirely
    ///
    /// Memoized handles of the plan are disposed and every workspace that
    /// had it active loses its mapping.
    pub async fn delete_plan(&self, plan_id: &str) -> StoreResult<()> {
        self.get_plan(plan_id).await?;
        let dir = self.factory.layout().plan_dir(plan_id);
        self.factory
            .lock_manager()
            .with_lock(&manifest_resource(plan_id), AcquireOptions::new(), || async {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| StoreError::storage(&dir, e))
            })
            .await?;
        self.factory.evict_plan(plan_id).await;
        let cleared = self.clear_active_plan(plan_id).await?;
        info!(plan_id, cleared_workspaces = cleared, "plan deleted");
        Ok(())
    }

    /// Recount every collection and store the result in the manifest
    pub async fn refresh_statistics(&self, plan_id: &str) -> StoreResult<PlanManifest> {
        self.get_plan(plan_id).await?;
        let collections = self.factory.load_collections(plan_id).await?;
        let statistics = PlanStatistics {
            total_requirements: collections.requirements.len(),
            total_solutions: collections.solutions.len(),
            total_decisions: collections.decisions.len(),
            total_phases: collections.phases.len(),
            total_artifacts: collections.artifacts.len(),
            total_links: collections.links.len(),
            completion_percentage: completion(&collections.phases),
        };
        self.update_plan(plan_id, None, move |manifest| manifest.statistics = statistics)
            .await
    }

    /// Make `plan_id` the active plan of `workspace`
    pub async fn set_active_plan(&self, workspace: &str, plan_id: &str) -> StoreResult<ActivePlan> {
        self.get_plan(plan_id).await?;
        let path = self.factory.layout().active_plans_file();
        let store = self.factory.store();
        self.factory
            .lock_manager()
            .with_lock(ACTIVE_PLANS_RESOURCE, AcquireOptions::new(), || async {
                let mut active: ActivePlans = store.read_optional(&path).await?.unwrap_or_default();
                let entry = ActivePlan {
                    plan_id: plan_id.to_string(),
                    last_updated: Utc::now(),
                };
                active.insert(workspace.to_string(), entry.clone());
                store.write(&path, &active).await?;
                Ok::<_, StoreError>(entry)
            })
            .await
    }

    /// Active plan of `workspace`
    pub async fn get_active_plan(&self, workspace: &str) -> StoreResult<Option<ActivePlan>> {
        let active: Option<ActivePlans> = self
            .factory
            .store()
            .read_optional(&self.factory.layout().active_plans_file())
            .await?;
        Ok(active.and_then(|mut all| all.remove(workspace)))
    }

    /// Drop every workspace mapping that points at `plan_id`
    async fn clear_active_plan(&self, plan_id: &str) -> StoreResult<usize> {
        let path = self.factory.layout().active_plans_file();
        let store = self.factory.store();
        self.factory
            .lock_manager()
            .with_lock(ACTIVE_PLANS_RESOURCE, AcquireOptions::new(), || async {
                let Some(mut active) = store.read_optional::<ActivePlans>(&path).await? else {
                    return Ok(0);
                };
                let before = active.len();
                active.retain(|_, entry| entry.plan_id != plan_id);
                let cleared = before - active.len();
                if cleared > 0 {
                    store.write(&path, &active).await?;
                }
                Ok::<_, StoreError>(cleared)
            })
            .await
    }
}

#[allow(clippy::cast_precision_loss)]
fn completion(phases: &[Phase]) -> f64 {
    if phases.is_empty() {
        return 0.0;
    }
    let done = phases
        .iter()
        .filter(|p| p.data.status == PhaseStatus::Completed)
        .count();
    (done as f64 / phases.len() as f64 * 100.0).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StoreConfig};
    use plandoc_model::{PhaseData, Requirement, RequirementData};
    use tempfile::TempDir;

    async fn plans(dir: &TempDir) -> PlanStore {
        let factory = RepositoryFactory::open(dir.path(), StoreConfig::default())
            .await
            .unwrap();
        PlanStore::new(Arc::new(factory))
    }

    #[tokio::test]
    async fn create_lays_out_plan_directory() {
        let dir = TempDir::new().unwrap();
        let plans = plans(&dir).await;
        let manifest = plans.create_plan(NewPlan::named("Roadmap")).await.unwrap();

        let layout = plans.factory().layout();
        assert!(layout.manifest_file(&manifest.id).exists());
        assert!(layout.links_file(&manifest.id).exists());
        assert!(layout.entity_file(&manifest.id, EntityKind::Artifact).exists());
        assert!(layout.plan_dir(&manifest.id).join("history").is_dir());
        assert_eq!(plans.get_plan(&manifest.id).await.unwrap(), manifest);
        assert_eq!(plans.list_plans().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_bumps_lock_version() {
        let dir = TempDir::new().unwrap();
        let plans = plans(&dir).await;
        let manifest = plans.create_plan(NewPlan::named("A")).await.unwrap();

        let updated = plans
            .update_plan(&manifest.id, Some(1), |m| m.name = "B".into())
            .await
            .unwrap();
        assert_eq!(updated.lock_version, 2);
        assert_eq!(updated.name, "B");

        let err = plans
            .update_plan(&manifest.id, Some(1), |m| m.name = "C".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn statistics_count_collections() {
        let dir = TempDir::new().unwrap();
        let plans = plans(&dir).await;
        let plan = plans.create_plan(NewPlan::named("A")).await.unwrap();
        let factory = plans.factory();

        factory
            .repository::<Requirement>(&plan.id)
            .unwrap()
            .create(Requirement::new(RequirementData::titled("r")))
            .await
            .unwrap();
        let mut done = PhaseData::titled("p1", None);
        done.status = PhaseStatus::Completed;
        let phases = factory.repository::<Phase>(&plan.id).unwrap();
        phases.create(Phase::new(done)).await.unwrap();
        phases.create(Phase::new(PhaseData::titled("p2", None))).await.unwrap();

        let manifest = plans.refresh_statistics(&plan.id).await.unwrap();
        assert_eq!(manifest.statistics.total_requirements, 1);
        assert_eq!(manifest.statistics.total_phases, 2);
        assert!((manifest.statistics.completion_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn active_plan_mapping() {
        let dir = TempDir::new().unwrap();
        let plans = plans(&dir).await;
        let plan = plans.create_plan(NewPlan::named("A")).await.unwrap();

        assert!(plans.get_active_plan("/ws").await.unwrap().is_none());
        plans.set_active_plan("/ws", &plan.id).await.unwrap();
        assert_eq!(plans.get_active_plan("/ws").await.unwrap().unwrap().plan_id, plan.id);
        assert!(plans.set_active_plan("/ws", "missing").await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_plan() {
        let dir = TempDir::new().unwrap();
        let plans = plans(&dir).await;
        let plan = plans.create_plan(NewPlan::named("A")).await.unwrap();

        plans.delete_plan(&plan.id).await.unwrap();
        assert!(matches!(
            plans.get_plan(&plan.id).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn delete_forgets_cached_entities_and_active_mapping() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            cache: Some(CacheConfig::default()),
            ..StoreConfig::default()
        };
        let factory = RepositoryFactory::open(dir.path(), config).await.unwrap();
        let plans = PlanStore::new(Arc::new(factory));
        let plan = plans.create_plan(NewPlan::named("A")).await.unwrap();
        let keep = plans.create_plan(NewPlan::named("B")).await.unwrap();

        let repo = plans.factory().repository::<Requirement>(&plan.id).unwrap();
        repo.create(Requirement::new(RequirementData::titled("r")))
            .await
            .unwrap();
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
        plans.set_active_plan("/ws", &plan.id).await.unwrap();
        plans.set_active_plan("/other", &keep.id).await.unwrap();

        plans.delete_plan(&plan.id).await.unwrap();

        assert!(repo.find_all().await.is_err());
        let fresh = plans.factory().repository::<Requirement>(&plan.id).unwrap();
        assert_eq!(fresh.find_all().await.unwrap().len(), 0);
        assert!(plans.get_active_plan("/ws").await.unwrap().is_none());
        assert_eq!(plans.get_active_plan("/other").await.unwrap().unwrap().plan_id, keep.id);
    }
}
