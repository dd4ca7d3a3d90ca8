//! Typed repository over one entity collection of one plan
//!
//! Every mutation holds the `(plan, collection)` lock for the whole
//! read → mutate → atomic write cycle. Reads never lock: the atomic store
//! guarantees the file is always a complete collection.

use crate::atomic::AtomicStore;
use crate::cache::{CacheStats, EntityCache};
use crate::collection::CollectionFile;
use crate::config::CacheConfig;
use crate::error::{ItemFailure, StoreError, StoreResult};
use crate::layout::StoreLayout;
use crate::query::{self, QueryResult, QuerySpec};
use crate::unit_of_work::UnitOfWork;
use chrono::Utc;
use plandoc_lock::LockManager;
use plandoc_model::{Entity, EntityKind};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// CRUD, query and bulk operations over one collection
#[derive(Debug)]
pub struct Repository<T: Entity> {
    file: CollectionFile,
    cache: Option<EntityCache<T>>,
    unit_of_work: Option<Arc<UnitOfWork>>,
    disposed: AtomicBool,
}

impl<T: Entity> Repository<T> {
    /// Repository for `T::KIND` in `plan_id`
    #[must_use]
    pub fn new(
        plan_id: &str,
        layout: &StoreLayout,
        locks: LockManager,
        store: AtomicStore,
        cache: Option<&CacheConfig>,
    ) -> Self {
        Self {
            file: CollectionFile::new(
                plan_id,
                T::KIND.collection_name(),
                layout.entity_file(plan_id, T::KIND),
                locks,
                store,
            ),
            cache: cache.map(EntityCache::new),
            unit_of_work: None,
            disposed: AtomicBool::new(false),
        }
    }

    /// Count every write against `unit_of_work`
    #[must_use]
    pub fn with_unit_of_work(mut self, unit_of_work: Arc<UnitOfWork>) -> Self {
        self.unit_of_work = Some(unit_of_work);
        self
    }

    /// Owning plan
    #[inline]
    #[must_use]
    pub fn plan_id(&self) -> &str {
        self.file.plan_id()
    }

    /// Stored kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    /// Collection file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Cache statistics, `None` when caching is off
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EntityCache::stats)
    }

    /// Persist a new entity
    pub async fn create(&self, entity: T) -> StoreResult<T> {
        validate_id(entity.id())?;
        let created = entity.clone();
        self.mutate("create", move |items| {
            if items.iter().any(|e| e.id() == entity.id()) {
                return Err(duplicate::<T>(entity.id()));
            }
            items.push(entity);
            Ok(())
        })
        .await?;
        Ok(created)
    }

    /// Entity by id, [`StoreError::NotFound`] when absent
    pub async fn find_by_id(&self, id: &str) -> StoreResult<T> {
        self.find_by_id_or_null(id)
            .await?
            .ok_or_else(|| StoreError::not_found(T::KIND.as_str(), id))
    }

    /// Entity by id
    pub async fn find_by_id_or_null(&self, id: &str) -> StoreResult<Option<T>> {
        self.ensure_active()?;
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(id).await {
                return Ok(Some(hit));
            }
        }
        let generation = self.cache.as_ref().map(EntityCache::generation);
        let all = self.load_cached().await?;
        let found = all.iter().find(|e| e.id() == id).cloned();
        if let (Some(cache), Some(generation), Some(entity)) = (&self.cache, generation, &found) {
            cache.populate(generation, entity.clone()).await;
        }
        Ok(found)
    }

    /// Every entity, in stored order
    pub async fn find_all(&self) -> StoreResult<Vec<T>> {
        self.ensure_active()?;
        Ok(self.load_cached().await?.as_ref().clone())
    }

    /// Filter, sort and paginate
    pub async fn query(&self, spec: &QuerySpec) -> StoreResult<QueryResult<T>> {
        let all = self.find_all().await?;
        query::apply(all, spec)
    }

    /// Check if an entity exists
    pub async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.find_by_id_or_null(id).await?.is_some())
    }

    /// Number of stored entities
    pub async fn count(&self) -> StoreResult<usize> {
        self.ensure_active()?;
        Ok(self.load_cached().await?.len())
    }

    /// Replace an entity, checking and bumping its version
    ///
    /// `entity.version()` must equal the stored version; the stored copy gets
    /// `version + 1` and a fresh `updatedAt`.
    pub async fn update(&self, mut entity: T) -> StoreResult<T> {
        self.mutate("update", move |items| {
            let slot = items
                .iter_mut()
                .find(|e| e.id() == entity.id())
                .ok_or_else(|| StoreError::not_found(T::KIND.as_str(), entity.id()))?;
            check_version(slot, &entity)?;
            entity.set_version(slot.version() + 1);
            entity.touch(Utc::now());
            *slot = entity.clone();
            Ok(entity)
        })
        .await
    }

    /// Remove an entity, [`StoreError::NotFound`] when absent
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        self.mutate("delete", |items| {
            let index = items
                .iter()
                .position(|e| e.id() == id)
                .ok_or_else(|| StoreError::not_found(T::KIND.as_str(), id))?;
            items.remove(index);
            Ok(())
        })
        .await
    }

    /// Persist several new entities in one write, or none of them
    pub async fn create_many(&self, entities: Vec<T>) -> StoreResult<Vec<T>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        self.mutate("create_many", move |items| {
            let existing: HashSet<&str> = items.iter().map(Entity::id).collect();
            let mut seen = HashSet::new();
            let failures: Vec<ItemFailure> = entities
                .iter()
                .enumerate()
                .filter_map(|(index, entity)| {
                    let id = entity.id();
                    let err = if let Err(err) = validate_id(id) {
                        err
                    } else if existing.contains(id) || !seen.insert(id) {
                        duplicate::<T>(id)
                    } else {
                        return None;
                    };
                    Some(failure(index, id, &err))
                })
                .collect();
            reject_if_any::<T>("create", failures)?;

            items.extend(entities.iter().cloned());
            Ok(entities)
        })
        .await
    }

    /// Apply several versioned updates in one write, or none of them
    pub async fn update_many(&self, entities: Vec<T>) -> StoreResult<Vec<T>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        self.mutate("update_many", move |items| {
            let positions: HashMap<String, usize> = items
                .iter()
                .enumerate()
                .map(|(i, e)| (e.id().to_string(), i))
                .collect();
            let mut seen = HashSet::new();
            let mut failures = Vec::new();
            for (index, entity) in entities.iter().enumerate() {
                let id = entity.id();
                let outcome = match positions.get(id) {
                    None => Err(StoreError::not_found(T::KIND.as_str(), id)),
                    Some(_) if !seen.insert(id) => Err(duplicate::<T>(id)),
                    Some(&pos) => check_version(&items[pos], entity),
                };
                if let Err(err) = outcome {
                    failures.push(failure(index, id, &err));
                }
            }
            reject_if_any::<T>("update", failures)?;

            let now = Utc::now();
            let mut updated = Vec::with_capacity(entities.len());
            for mut entity in entities {
                let pos = positions[entity.id()];
                entity.set_version(items[pos].version() + 1);
                entity.touch(now);
                items[pos] = entity.clone();
                updated.push(entity);
            }
            Ok(updated)
        })
        .await
    }

    /// Insert new entities and overwrite existing ones in one write
    ///
    /// Overwritten entities get the stored version + 1; no version check is
    /// made.
    pub async fn upsert_many(&self, entities: Vec<T>) -> StoreResult<Vec<T>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        self.mutate("upsert_many", move |items| {
            let mut seen = HashSet::new();
            let failures: Vec<ItemFailure> = entities
                .iter()
                .enumerate()
                .filter_map(|(index, entity)| {
                    let id = entity.id();
                    let err = match validate_id(id) {
                        Err(err) => err,
                        Ok(()) if !seen.insert(id) => duplicate::<T>(id),
                        Ok(()) => return None,
                    };
                    Some(failure(index, id, &err))
                })
                .collect();
            reject_if_any::<T>("upsert", failures)?;

            let now = Utc::now();
            let mut written = Vec::with_capacity(entities.len());
            for mut entity in entities {
                if let Some(slot) = items.iter_mut().find(|e| e.id() == entity.id()) {
                    entity.set_version(slot.version() + 1);
                    entity.touch(now);
                    *slot = entity.clone();
                } else {
                    items.push(entity.clone());
                }
                written.push(entity);
            }
            Ok(written)
        })
        .await
    }

    /// Whole collection straight from disk, bypassing the cache
    pub async fn load_collection(&self) -> StoreResult<Vec<T>> {
        self.ensure_active()?;
        self.file.read().await
    }

    /// Replace the whole collection verbatim
    pub async fn save_collection(&self, entities: Vec<T>) -> StoreResult<()> {
        self.mutate("save_collection", move |items| {
            *items = entities;
            Ok(())
        })
        .await
    }

    /// Stop serving requests and drop cached data
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.invalidate().await;
        }
        debug!(plan_id = %self.plan_id(), collection = T::KIND.collection_name(), "repository disposed");
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::validation(format!(
                "{} repository of plan '{}' is disposed",
                T::KIND,
                self.plan_id()
            )));
        }
        Ok(())
    }

    async fn load_cached(&self) -> StoreResult<Arc<Vec<T>>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(self.file.read().await?));
        };
        if let Some(all) = cache.get_all().await {
            return Ok(all);
        }
        let generation = cache.generation();
        let all = Arc::new(self.file.read::<T>().await?);
        cache.populate_all(generation, Arc::clone(&all)).await;
        Ok(all)
    }

    async fn mutate<R, F>(&self, op: &'static str, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Vec<T>) -> StoreResult<R>,
    {
        self.ensure_active()?;
        self.file.mutate(op, f, self.after_write()).await
    }

    fn after_write(&self) -> impl Future<Output = ()> + '_ {
        async move {
            if let Some(cache) = &self.cache {
                cache.invalidate().await;
            }
            if let Some(unit_of_work) = &self.unit_of_work {
                unit_of_work.record_operation();
            }
        }
    }
}

fn validate_id(id: &str) -> StoreResult<()> {
    if id.trim().is_empty() {
        return Err(StoreError::validation("entity id must not be empty"));
    }
    Ok(())
}

fn check_version<T: Entity>(stored: &T, incoming: &T) -> StoreResult<()> {
    if stored.version() == incoming.version() {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            id: incoming.id().to_string(),
            expected: incoming.version(),
            actual: stored.version(),
        })
    }
}

fn duplicate<T: Entity>(id: &str) -> StoreError {
    StoreError::Duplicate {
        resource: T::KIND.as_str().to_string(),
        id: id.to_string(),
    }
}

fn failure(index: usize, id: &str, err: &StoreError) -> ItemFailure {
    ItemFailure {
        index,
        id: Some(id.to_string()).filter(|id| !id.is_empty()),
        code: err.code(),
        message: err.to_string(),
    }
}

fn reject_if_any<T: Entity>(op: &str, failures: Vec<ItemFailure>) -> StoreResult<()> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(StoreError::BulkOperation {
        message: format!("bulk {op} of {} rejected", T::KIND.collection_name()),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtomicWriteConfig;
    use plandoc_lock::LockConfig;
    use plandoc_model::{Requirement, RequirementData};
    use tempfile::TempDir;

    fn repo(dir: &TempDir, cache: bool) -> Repository<Requirement> {
        let layout = StoreLayout::new(dir.path());
        let locks = LockManager::new(layout.lock_dir(), LockConfig::default());
        let cache_config = CacheConfig::default();
        Repository::new(
            "p1",
            &layout,
            locks,
            AtomicStore::new(AtomicWriteConfig::default()),
            cache.then_some(&cache_config),
        )
    }

    fn req(title: &str) -> Requirement {
        Requirement::new(RequirementData::titled(title))
    }

    #[tokio::test]
    async fn create_then_find() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, false);
        let created = repo.create(req("a")).await.unwrap();

        assert_eq!(repo.find_by_id(&created.id).await.unwrap(), created);
        assert!(repo.exists(&created.id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(matches!(
            repo.find_by_id("missing").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
        assert!(repo.find_by_id_or_null("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, false);
        let item = repo.create(req("a")).await.unwrap();

        let err = repo.create(item).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn update_checks_and_bumps_version() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, true);
        let mut item = repo.create(req("a")).await.unwrap();

        item.data.title = "renamed".into();
        let updated = repo.update(item.clone()).await.unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at >= item.updated_at);

        let err = repo.update(item).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn cache_sees_writes() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, true);
        let item = repo.create(req("a")).await.unwrap();
        assert_eq!(repo.find_all().await.unwrap().len(), 1);

        let mut changed = repo.find_by_id(&item.id).await.unwrap();
        changed.data.title = "b".into();
        repo.update(changed).await.unwrap();

        assert_eq!(repo.find_by_id(&item.id).await.unwrap().data.title, "b");
        assert_eq!(repo.find_all().await.unwrap()[0].data.title, "b");
    }

    #[tokio::test]
    async fn create_many_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, false);
        let existing = repo.create(req("a")).await.unwrap();

        let err = repo
            .create_many(vec![req("b"), existing.clone(), req("c")])
            .await
            .unwrap_err();
        match err {
            StoreError::BulkOperation { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("expected BulkOperation, got {other:?}"),
        }
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_many_rejects_stale_items() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, false);
        let created = repo.create_many(vec![req("a"), req("b")]).await.unwrap();

        let mut stale = created[1].clone();
        stale.version = 9;
        let err = repo
            .update_many(vec![created[0].clone(), stale])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BULK_OPERATION_ERROR");
        assert!(repo.find_all().await.unwrap().iter().all(|e| e.version == 1));

        let updated = repo.update_many(created).await.unwrap();
        assert!(updated.iter().all(|e| e.version == 2));
    }

    #[tokio::test]
    async fn upsert_many_inserts_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, false);
        let mut existing = repo.create(req("a")).await.unwrap();
        existing.data.title = "a2".into();

        let written = repo.upsert_many(vec![existing.clone(), req("new")]).await.unwrap();
        assert_eq!(written[0].version, 2);
        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.find_by_id(&existing.id).await.unwrap().data.title, "a2");
    }

    #[tokio::test]
    async fn delete_then_missing() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, true);
        let item = repo.create(req("a")).await.unwrap();

        repo.delete(&item.id).await.unwrap();
        assert!(!repo.exists(&item.id).await.unwrap());
        assert!(matches!(
            repo.delete(&item.id).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn oversized_collection_is_served_from_disk() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path());
        let repo = Repository::<Requirement>::new(
            "p1",
            &layout,
            LockManager::new(layout.lock_dir(), LockConfig::default()),
            AtomicStore::new(AtomicWriteConfig::default()),
            Some(&CacheConfig::default().with_max_capacity(1)),
        );
        let created = repo
            .create_many(vec![req("a"), req("b"), req("c")])
            .await
            .unwrap();

        assert_eq!(repo.find_all().await.unwrap().len(), 3);
        assert_eq!(repo.find_all().await.unwrap().len(), 3);
        let cache = repo.cache.as_ref().unwrap();
        assert!(cache.get_all().await.is_none());

        let found = repo.find_by_id(&created[2].id).await.unwrap();
        assert_eq!(cache.get(&created[2].id).await, Some(found));
    }

    #[tokio::test]
    async fn writes_are_counted_by_the_unit_of_work() {
        let dir = TempDir::new().unwrap();
        let uow = Arc::new(UnitOfWork::new("p1"));
        let repo = repo(&dir, false).with_unit_of_work(Arc::clone(&uow));

        uow.begin().unwrap();
        let created = repo.create(req("a")).await.unwrap();
        repo.update(created).await.unwrap();
        assert!(repo.delete("missing").await.is_err());
        repo.find_all().await.unwrap();
        assert_eq!(uow.operation_count(), 2);
        uow.commit().unwrap();
    }

    #[tokio::test]
    async fn disposed_repository_rejects_calls() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir, true);
        repo.dispose().await;
        repo.dispose().await;

        assert!(repo.find_all().await.is_err());
        assert!(repo.create(req("a")).await.is_err());
    }
}
