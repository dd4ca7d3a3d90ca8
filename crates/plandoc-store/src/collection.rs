//! One JSON array file guarded by one lock resource

use crate::atomic::AtomicStore;
use crate::error::{StoreError, StoreResult};
use crate::layout::collection_resource;
use plandoc_lock::{AcquireOptions, LockManager};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locked read-modify-write access to one collection file
#[derive(Debug, Clone)]
pub(crate) struct CollectionFile {
    plan_id: String,
    name: &'static str,
    path: PathBuf,
    resource: String,
    locks: LockManager,
    store: AtomicStore,
}

impl CollectionFile {
    pub(crate) fn new(
        plan_id: &str,
        name: &'static str,
        path: PathBuf,
        locks: LockManager,
        store: AtomicStore,
    ) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            name,
            resource: collection_resource(plan_id, name),
            path,
            locks,
            store,
        }
    }

    pub(crate) fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents; a missing file is an empty collection
    pub(crate) async fn read<T: DeserializeOwned>(&self) -> StoreResult<Vec<T>> {
        Ok(self
            .store
            .read_optional::<Vec<T>>(&self.path)
            .await?
            .unwrap_or_default())
    }

    /// Lock, read, apply `f`, write back, unlock
    ///
    /// Nothing is written when `f` fails. `after_write` runs while the lock
    /// is still held.
    pub(crate) async fn mutate<T, R, F, A>(&self, op: &'static str, f: F, after_write: A) -> StoreResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<T>) -> StoreResult<R>,
        A: std::future::Future<Output = ()>,
    {
        self.locks
            .with_lock(&self.resource, AcquireOptions::new(), || async move {
                let mut items = self.read::<T>().await?;
                let result = f(&mut items)?;
                self.store.write(&self.path, &items).await?;
                after_write.await;
                debug!(
                    plan_id = %self.plan_id,
                    collection = self.name,
                    op,
                    count = items.len(),
                    "collection written"
                );
                Ok::<R, StoreError>(result)
            })
            .await
    }
}
