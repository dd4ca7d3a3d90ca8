//! plandoc Store
//!
//! Concurrency-safe JSON persistence for plans.
//!
//! # Architecture
//!
//! ```text
//! RepositoryFactory ──┬── Repository<T>   one per (plan, entity kind), optional moka cache
//!                     ├── LinkRepository  one per plan
//!                     └── UnitOfWork      one per plan, advisory
//!          │
//!          ├── LockManager   shared, never disposed by the factory
//!          └── AtomicStore   temp file + rename for every write
//! ```
//!
//! Every mutation locks `"<planId>/<collection>"`, reads the whole
//! collection, changes it in memory and atomically replaces the file.
//!
//! # Example
//!
//! ```rust,ignore
//! use plandoc_model::{Requirement, RequirementData};
//! use plandoc_store::{RepositoryFactory, StoreConfig};
//!
//! let factory = RepositoryFactory::open("/var/lib/plandoc", StoreConfig::default()).await?;
//! let requirements = factory.repository::<Requirement>("plan-1")?;
//! let created = requirements
//!     .create(Requirement::new(RequirementData::titled("Offline mode")))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod atomic;
pub mod cache;
mod collection;
pub mod config;
pub mod error;
pub mod factory;
pub mod layout;
pub mod links;
pub mod plans;
pub mod query;
pub mod repository;
pub mod snapshot;
pub mod unit_of_work;

pub use atomic::{parse_json, AtomicStore, StagedWrite};
pub use cache::{CacheStats, EntityCache};
pub use config::{AtomicWriteConfig, CacheConfig, StoreConfig};
pub use error::{ErrorKind, ItemFailure, StoreError, StoreResult};
pub use factory::RepositoryFactory;
pub use layout::StoreLayout;
pub use links::{LinkQuery, LinkRepository};
pub use plans::{ActivePlan, NewPlan, PlanManifest, PlanStatistics, PlanStatus, PlanStore};
pub use query::{Filter, FilterOp, Pagination, QueryResult, QuerySpec, SortDirection, SortField};
pub use repository::Repository;
pub use snapshot::PlanCollections;
pub use unit_of_work::{TransactionWarning, UnitOfWork};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
