//! Construction and memoization of per-plan repositories
//!
//! One factory owns every repository, link repository and unit of work it
//! creates. The [`LockManager`] is shared with the caller and is never
//! disposed here.

use crate::atomic::AtomicStore;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::layout::{validate_plan_id, StoreLayout};
use crate::links::LinkRepository;
use crate::repository::Repository;
use crate::snapshot::PlanCollections;
use crate::unit_of_work::UnitOfWork;
use dashmap::DashMap;
use plandoc_lock::LockManager;
use plandoc_model::{Artifact, Decision, Entity, EntityKind, Phase, Requirement, Solution};
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait::async_trait]
trait DisposeRepository: Send + Sync {
    async fn dispose_repository(&self);
}

#[async_trait::async_trait]
impl<T: Entity> DisposeRepository for Repository<T> {
    async fn dispose_repository(&self) {
        self.dispose().await;
    }
}

struct RepositorySlot {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn DisposeRepository>,
}

/// Per-plan repository registry
pub struct RepositoryFactory {
    layout: StoreLayout,
    config: StoreConfig,
    locks: LockManager,
    store: AtomicStore,
    repositories: DashMap<(String, EntityKind), RepositorySlot>,
    link_repositories: DashMap<String, Arc<LinkRepository>>,
    units: DashMap<String, Arc<UnitOfWork>>,
    disposed: AtomicBool,
}

impl RepositoryFactory {
    /// Factory over `root` sharing `locks`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: StoreConfig, locks: LockManager) -> Self {
        let store = AtomicStore::new(config.atomic.clone());
        Self {
            layout: StoreLayout::new(root),
            config,
            locks,
            store,
            repositories: DashMap::new(),
            link_repositories: DashMap::new(),
            units: DashMap::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Factory with its own lock manager under `<root>/.locks`
    pub async fn open(root: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        let layout = StoreLayout::new(root);
        let locks = LockManager::new(layout.lock_dir(), config.lock.clone());
        locks.initialize().await?;
        info!(root = %layout.root().display(), "store opened");
        Ok(Self::new(layout.root(), config, locks))
    }

    /// Path helpers
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared lock manager
    #[inline]
    #[must_use]
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Atomic store used by every repository
    #[inline]
    #[must_use]
    pub fn store(&self) -> &AtomicStore {
        &self.store
    }

    /// Repository for `T` in `plan_id`; repeated calls return the same `Arc`
    ///
    /// Every write through the repository is counted by the plan's
    /// [`UnitOfWork`].
    pub fn repository<T: Entity>(&self, plan_id: &str) -> StoreResult<Arc<Repository<T>>> {
        let unit = self.unit_of_work(plan_id)?;

        let typed = Arc::clone(
            &self
                .repositories
                .entry((plan_id.to_string(), T::KIND))
                .or_insert_with(|| {
                    debug!(plan_id, collection = T::KIND.collection_name(), "creating repository");
                    let repository = Arc::new(
                        Repository::<T>::new(
                            plan_id,
                            &self.layout,
                            self.locks.clone(),
                            self.store.clone(),
                            self.config.cache.as_ref(),
                        )
                        .with_unit_of_work(Arc::clone(&unit)),
                    );
                    RepositorySlot {
                        typed: Arc::clone(&repository) as Arc<dyn Any + Send + Sync>,
                        erased: repository,
                    }
                })
                .typed,
        );

        typed.downcast::<Repository<T>>().map_err(|_| {
            StoreError::validation(format!(
                "repository registered for {} has a different record type",
                T::KIND
            ))
        })
    }

    /// Link repository of `plan_id`
    pub fn link_repository(&self, plan_id: &str) -> StoreResult<Arc<LinkRepository>> {
        let unit = self.unit_of_work(plan_id)?;
        Ok(Arc::clone(
            self.link_repositories
                .entry(plan_id.to_string())
                .or_insert_with(|| {
                    Arc::new(
                        LinkRepository::new(plan_id, &self.layout, self.locks.clone(), self.store.clone())
                            .with_unit_of_work(Arc::clone(&unit)),
                    )
                })
                .value(),
        ))
    }

    /// Unit of work of `plan_id`
    pub fn unit_of_work(&self, plan_id: &str) -> StoreResult<Arc<UnitOfWork>> {
        self.ensure_active()?;
        validate_plan_id(plan_id)?;
        Ok(Arc::clone(
            self.units
                .entry(plan_id.to_string())
                .or_insert_with(|| Arc::new(UnitOfWork::new(plan_id)))
                .value(),
        ))
    }

    /// Number of memoized entity repositories
    #[must_use]
    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }

    /// Check if `id` exists in the `kind` collection of `plan_id`
    pub async fn entity_exists(&self, plan_id: &str, kind: EntityKind, id: &str) -> StoreResult<bool> {
        match kind {
            EntityKind::Requirement => self.repository::<Requirement>(plan_id)?.exists(id).await,
            EntityKind::Solution => self.repository::<Solution>(plan_id)?.exists(id).await,
            EntityKind::Decision => self.repository::<Decision>(plan_id)?.exists(id).await,
            EntityKind::Phase => self.repository::<Phase>(plan_id)?.exists(id).await,
            EntityKind::Artifact => self.repository::<Artifact>(plan_id)?.exists(id).await,
        }
    }

    /// Collection holding `id`, searched in [`EntityKind::ALL`] order
    pub async fn find_entity_kind(&self, plan_id: &str, id: &str) -> StoreResult<Option<EntityKind>> {
        for kind in EntityKind::ALL {
            if self.entity_exists(plan_id, kind, id).await? {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    /// Read every collection of `plan_id` from disk
    pub async fn load_collections(&self, plan_id: &str) -> StoreResult<PlanCollections> {
        Ok(PlanCollections {
            requirements: self.repository::<Requirement>(plan_id)?.load_collection().await?,
            solutions: self.repository::<Solution>(plan_id)?.load_collection().await?,
            decisions: self.repository::<Decision>(plan_id)?.load_collection().await?,
            phases: self.repository::<Phase>(plan_id)?.load_collection().await?,
            artifacts: self.repository::<Artifact>(plan_id)?.load_collection().await?,
            links: self.link_repository(plan_id)?.load_collection().await?,
        })
    }

    /// Overwrite every collection of `plan_id`
    ///
    /// Every collection is attempted even after a failure; the first error is
    /// returned.
    pub async fn save_collections(&self, plan_id: &str, collections: &PlanCollections) -> StoreResult<()> {
        let results = [
            self.repository::<Requirement>(plan_id)?
                .save_collection(collections.requirements.clone())
                .await,
            self.repository::<Solution>(plan_id)?
                .save_collection(collections.solutions.clone())
                .await,
            self.repository::<Decision>(plan_id)?
                .save_collection(collections.decisions.clone())
                .await,
            self.repository::<Phase>(plan_id)?
                .save_collection(collections.phases.clone())
                .await,
            self.repository::<Artifact>(plan_id)?
                .save_collection(collections.artifacts.clone())
                .await,
            self.link_repository(plan_id)?
                .save_collection(collections.links.clone())
                .await,
        ];

        let mut first = None;
        for result in results {
            if let Err(err) = result {
                warn!(plan_id, error = %err, "collection not saved");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Dispose every memoized repository and unit of work
    ///
    /// Best-effort and idempotent. The shared lock manager stays usable.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let repositories: Vec<Arc<dyn DisposeRepository>> = self
            .repositories
            .iter()
            .map(|slot| Arc::clone(&slot.erased))
            .collect();
        futures::future::join_all(repositories.iter().map(|r| r.dispose_repository())).await;
        for links in self.link_repositories.iter() {
            links.dispose();
        }
        for unit in self.units.iter() {
            unit.dispose();
        }

        self.repositories.clear();
        self.link_repositories.clear();
        self.units.clear();
        info!(repositories = repositories.len(), "repository factory disposed");
    }

    /// Dispose and forget everything memoized for `plan_id`
    ///
    /// Handles obtained earlier fail from now on; the next call to
    /// [`RepositoryFactory::repository`] builds fresh ones.
    pub async fn evict_plan(&self, plan_id: &str) {
        let keys: Vec<(String, EntityKind)> = self
            .repositories
            .iter()
            .filter(|slot| slot.key().0 == plan_id)
            .map(|slot| slot.key().clone())
            .collect();
        let evicted: Vec<Arc<dyn DisposeRepository>> = keys
            .iter()
            .filter_map(|key| self.repositories.remove(key))
            .map(|(_, slot)| slot.erased)
            .collect();
        futures::future::join_all(evicted.iter().map(|r| r.dispose_repository())).await;

        if let Some((_, links)) = self.link_repositories.remove(plan_id) {
            links.dispose();
        }
        if let Some((_, unit)) = self.units.remove(plan_id) {
            unit.dispose();
        }
        debug!(plan_id, repositories = evicted.len(), "plan evicted from factory");
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::validation("repository factory is disposed"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("root", &self.layout.root())
            .field("repositories", &self.repositories.len())
            .field("link_repositories", &self.link_repositories.len())
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plandoc_lock::LockConfig;
    use tempfile::TempDir;

    fn factory(dir: &TempDir) -> RepositoryFactory {
        let locks = LockManager::new(dir.path().join(".locks"), LockConfig::default());
        RepositoryFactory::new(dir.path(), StoreConfig::default(), locks)
    }

    #[test]
    fn repositories_are_memoized_per_plan_and_kind() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);

        let a = factory.repository::<Requirement>("p1").unwrap();
        let b = factory.repository::<Requirement>("p1").unwrap();
        let other_plan = factory.repository::<Requirement>("p2").unwrap();
        let other_kind = factory.repository::<Phase>("p1").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other_plan));
        assert_eq!(other_kind.kind(), EntityKind::Phase);
        assert_eq!(factory.repository_count(), 3);

        assert!(Arc::ptr_eq(
            &factory.link_repository("p1").unwrap(),
            &factory.link_repository("p1").unwrap()
        ));
        assert!(Arc::ptr_eq(
            &factory.unit_of_work("p1").unwrap(),
            &factory.unit_of_work("p1").unwrap()
        ));
    }

    #[test]
    fn empty_plan_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        assert_eq!(
            factory.repository::<Requirement>("").unwrap_err().code(),
            "VALIDATION_ERROR"
        );
        assert!(factory.link_repository(" ").is_err());
        assert!(factory.unit_of_work("").is_err());
    }

    #[tokio::test]
    async fn dispose_keeps_lock_manager_alive() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let repo = factory.repository::<Requirement>("p1").unwrap();
        let links = factory.link_repository("p1").unwrap();

        factory.dispose().await;
        factory.dispose().await;

        assert!(repo.find_all().await.is_err());
        assert!(links.find_all().await.is_err());
        assert!(factory.repository::<Requirement>("p1").is_err());
        assert!(!factory.lock_manager().is_disposed());
        factory
            .lock_manager()
            .acquire("p1/requirements", plandoc_lock::AcquireOptions::new())
            .await
            .unwrap()
            .release()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn evicted_plan_gets_fresh_handles() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let repo = factory.repository::<Requirement>("p1").unwrap();
        let links = factory.link_repository("p1").unwrap();
        let unit = factory.unit_of_work("p1").unwrap();
        let other = factory.repository::<Requirement>("p2").unwrap();

        factory.evict_plan("p1").await;

        assert!(repo.find_all().await.is_err());
        assert!(links.find_all().await.is_err());
        assert!(unit.begin().is_err());
        assert!(other.find_all().await.is_ok());
        assert_eq!(factory.repository_count(), 1);

        let fresh = factory.repository::<Requirement>("p1").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &repo));
        assert!(fresh.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_execute_reports_persisted_writes() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let repo = factory.repository::<Requirement>("p1").unwrap();
        let unit = factory.unit_of_work("p1").unwrap();
        let reported = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        unit.on_warning(move |w| sink.lock().push(w.operations));

        let result: StoreResult<()> = unit
            .execute(|| async {
                repo.create(Requirement::new(plandoc_model::RequirementData::titled("r")))
                    .await?;
                Err(StoreError::validation("failed after the write"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*reported.lock(), vec![1]);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
