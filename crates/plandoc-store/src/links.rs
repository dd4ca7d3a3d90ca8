//! Link collection of one plan (`links.json`)

use crate::atomic::AtomicStore;
use crate::collection::CollectionFile;
use crate::error::{StoreError, StoreResult};
use crate::layout::StoreLayout;
use crate::unit_of_work::UnitOfWork;
use plandoc_lock::LockManager;
use plandoc_model::{Link, LinkData, RelationType};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Criteria for [`LinkRepository::find`]; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkQuery {
    /// Source entity
    pub source_id: Option<String>,
    /// Target entity
    pub target_id: Option<String>,
    /// Relation
    pub relation_type: Option<RelationType>,
}

impl LinkQuery {
    fn matches(&self, link: &Link) -> bool {
        self.source_id.as_deref().map_or(true, |id| link.source_id() == id)
            && self.target_id.as_deref().map_or(true, |id| link.target_id() == id)
            && self.relation_type.map_or(true, |r| link.relation_type() == r)
    }
}

/// Locked access to the links of one plan
#[derive(Debug)]
pub struct LinkRepository {
    file: CollectionFile,
    unit_of_work: Option<Arc<UnitOfWork>>,
    disposed: AtomicBool,
}

impl LinkRepository {
    /// Repository for `plan_id`
    #[must_use]
    pub fn new(plan_id: &str, layout: &StoreLayout, locks: LockManager, store: AtomicStore) -> Self {
        Self {
            file: CollectionFile::new(plan_id, "links", layout.links_file(plan_id), locks, store),
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

    /// Links file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Persist a new link
    ///
    /// Self-links and a second link with the same source, target and relation
    /// are rejected.
    pub async fn create(&self, data: LinkData) -> StoreResult<Link> {
        self.ensure_active()?;
        validate(&data)?;
        let link = Link::new(data);
        let created = link.clone();
        self.file
            .mutate(
                "create_link",
                move |links: &mut Vec<Link>| {
                    if links.iter().any(|l| l.same_edge(&link.data)) {
                        return Err(StoreError::Duplicate {
                            resource: "link".into(),
                            id: format!(
                                "{} -{}-> {}",
                                link.source_id(),
                                link.relation_type(),
                                link.target_id()
                            ),
                        });
                    }
                    links.push(link);
                    Ok(())
                },
                self.after_write(),
            )
            .await?;
        Ok(created)
    }

    /// Link by id
    pub async fn get(&self, id: &str) -> StoreResult<Link> {
        self.find_all()
            .await?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::not_found("link", id))
    }

    /// Links matching `query`
    pub async fn find(&self, query: &LinkQuery) -> StoreResult<Vec<Link>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|l| query.matches(l))
            .collect())
    }

    /// Links touching `entity_id` at either end
    pub async fn entity_links(&self, entity_id: &str) -> StoreResult<Vec<Link>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|l| l.touches(entity_id))
            .collect())
    }

    /// Every link
    pub async fn find_all(&self) -> StoreResult<Vec<Link>> {
        self.ensure_active()?;
        self.file.read().await
    }

    /// Number of links
    pub async fn count(&self) -> StoreResult<usize> {
        Ok(self.find_all().await?.len())
    }

    /// Remove a link, [`StoreError::NotFound`] when absent
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        self.ensure_active()?;
        self.file
            .mutate(
                "delete_link",
                |links: &mut Vec<Link>| {
                    let index = links
                        .iter()
                        .position(|l| l.id == id)
                        .ok_or_else(|| StoreError::not_found("link", id))?;
                    links.remove(index);
                    Ok(())
                },
                self.after_write(),
            )
            .await
    }

    /// Remove every link touching `entity_id`; returns how many went
    pub async fn delete_for_entity(&self, entity_id: &str) -> StoreResult<usize> {
        self.ensure_active()?;
        self.file
            .mutate(
                "delete_entity_links",
                |links: &mut Vec<Link>| {
                    let before = links.len();
                    links.retain(|l| !l.touches(entity_id));
                    Ok(before - links.len())
                },
                self.after_write(),
            )
            .await
    }

    /// Whole collection from disk
    pub async fn load_collection(&self) -> StoreResult<Vec<Link>> {
        self.find_all().await
    }

    /// Replace the whole collection verbatim
    pub async fn save_collection(&self, links: Vec<Link>) -> StoreResult<()> {
        self.ensure_active()?;
        self.file
            .mutate(
                "save_links",
                move |current: &mut Vec<Link>| {
                    *current = links;
                    Ok(())
                },
                self.after_write(),
            )
            .await
    }

    /// Stop serving requests
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!(plan_id = %self.plan_id(), "link repository disposed");
        }
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::validation(format!(
                "link repository of plan '{}' is disposed",
                self.plan_id()
            )));
        }
        Ok(())
    }

    fn after_write(&self) -> impl Future<Output = ()> + '_ {
        async move {
            if let Some(unit_of_work) = &self.unit_of_work {
                unit_of_work.record_operation();
            }
        }
    }
}

fn validate(data: &LinkData) -> StoreResult<()> {
    if data.source_id.trim().is_empty() || data.target_id.trim().is_empty() {
        return Err(StoreError::validation("link endpoints must not be empty"));
    }
    if data.source_id == data.target_id {
        return Err(StoreError::validation(format!(
            "link from '{}' to itself is not allowed",
            data.source_id
        )));
    }
    Ok(())
}
