//! Persistence seam for the batch engine
//!
//! [`BatchBackend`] creates one resolved entity; [`SnapshotBackend`] reads
//! and overwrites every collection of a plan, which atomic batches need for
//! rollback. Both are implemented for [`RepositoryFactory`].

use crate::operation::Draft;
use async_trait::async_trait;
use plandoc_model::{EntityData, EntityKind, Phase, PhaseData, Record};
use plandoc_store::{PlanCollections, RepositoryFactory, StoreError, StoreResult};
use tracing::debug;

/// Creates entities on behalf of the batch engine
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Persist `draft` and return the generated id
    ///
    /// Dangling ids in id-bearing fields are rejected with
    /// [`StoreError::NotFound`].
    async fn create(&self, plan_id: &str, draft: Draft) -> StoreResult<String>;

    /// Whole-collection access, `None` if the backend cannot roll back
    fn snapshots(&self) -> Option<&dyn SnapshotBackend>;
}

/// Full-collection load and save
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Copy of every collection of `plan_id`
    async fn load_collections(&self, plan_id: &str) -> StoreResult<PlanCollections>;

    /// Overwrite every collection of `plan_id`
    async fn save_collections(&self, plan_id: &str, collections: &PlanCollections) -> StoreResult<()>;
}

#[async_trait]
impl BatchBackend for RepositoryFactory {
    async fn create(&self, plan_id: &str, draft: Draft) -> StoreResult<String> {
        check_references(self, plan_id, &draft).await?;
        let id = match draft {
            Draft::Requirement(data) => insert(self, plan_id, data).await?,
            Draft::Solution(data) => insert(self, plan_id, data).await?,
            Draft::Decision(data) => insert(self, plan_id, data).await?,
            Draft::Artifact(data) => insert(self, plan_id, data).await?,
            Draft::Phase(data) => {
                let phase = place_phase(self, plan_id, data).await?;
                self.repository::<Phase>(plan_id)?.create(phase).await?.id
            }
            Draft::Link(data) => self.link_repository(plan_id)?.create(data).await?.id,
        };
        Ok(id)
    }

    fn snapshots(&self) -> Option<&dyn SnapshotBackend> {
        Some(self)
    }
}

#[async_trait]
impl SnapshotBackend for RepositoryFactory {
    async fn load_collections(&self, plan_id: &str) -> StoreResult<PlanCollections> {
        RepositoryFactory::load_collections(self, plan_id).await
    }

    async fn save_collections(&self, plan_id: &str, collections: &PlanCollections) -> StoreResult<()> {
        RepositoryFactory::save_collections(self, plan_id, collections).await
    }
}

async fn insert<D: EntityData>(factory: &RepositoryFactory, plan_id: &str, data: D) -> StoreResult<String> {
    let record = factory
        .repository::<Record<D>>(plan_id)?
        .create(Record::new(data))
        .await?;
    Ok(record.id)
}

async fn check_references(factory: &RepositoryFactory, plan_id: &str, draft: &Draft) -> StoreResult<()> {
    for reference in draft.id_refs() {
        let found = match reference.field.target {
            Some(kind) => factory.entity_exists(plan_id, kind, reference.value).await?,
            None => factory.find_entity_kind(plan_id, reference.value).await?.is_some(),
        };
        if !found {
            let resource = reference.field.target.map_or("entity", EntityKind::as_str);
            debug!(plan_id, field = reference.field.path, id = reference.value, "dangling reference");
            return Err(StoreError::not_found(resource, reference.value));
        }
    }
    Ok(())
}

/// Derive `depth`, `path` and sibling `order` from the parent
async fn place_phase(factory: &RepositoryFactory, plan_id: &str, data: PhaseData) -> StoreResult<Phase> {
    let phases = factory.repository::<Phase>(plan_id)?;
    let mut phase = Phase::new(data);

    let parent = match phase.data.parent_id.as_deref() {
        Some(parent_id) => Some(phases.find_by_id(parent_id).await?),
        None => None,
    };

    if phase.data.order == 0 {
        let siblings = phases
            .find_all()
            .await?
            .iter()
            .filter(|p| p.data.parent_id == phase.data.parent_id)
            .count();
        phase.data.order = u32::try_from(siblings + 1).unwrap_or(u32::MAX);
    }

    match parent {
        Some(parent) => {
            let parent_path = if parent.data.path.is_empty() {
                parent.id.as_str()
            } else {
                parent.data.path.as_str()
            };
            phase.data.depth = parent.data.depth + 1;
            phase.data.path = format!("{parent_path}/{}", phase.id);
        }
        None => {
            phase.data.depth = 0;
            phase.data.path = phase.id.clone();
        }
    }
    Ok(phase)
}
