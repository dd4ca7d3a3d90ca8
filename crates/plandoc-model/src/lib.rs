//! plandoc Model
//!
//! Statically typed records for everything a plan persists: requirements,
//! solutions, decisions, phases, artifacts, and the links between them.
//!
//! # Core Concepts
//!
//! - [`EntityKind`]: the five entity collections a plan owns
//! - [`Record`]: versioned envelope (`id`, `version`, timestamps, metadata) around kind data
//! - [`Entity`]: what the repository layer needs from a persisted record
//! - [`IdBearing`]: the explicit table of identifier-bearing fields per kind
//! - [`Link`]: typed relation between two entities, stored per plan
//!
//! # Example
//!
//! ```rust
//! use plandoc_model::{Record, RequirementData, Entity};
//!
//! let requirement = Record::new(RequirementData::titled("Offline mode"));
//! assert_eq!(requirement.version(), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod entities;
mod id_fields;
mod kind;
mod link;
mod record;

pub use entities::{
    Alternative, ArtifactContent, ArtifactData, ArtifactStatus, ArtifactType, DecisionData,
    DecisionStatus, EffortEstimate, EffortUnit, Feasibility, PhaseData, PhaseSchedule,
    PhaseStatus, Priority, RequirementCategory, RequirementData, RequirementSource,
    RequirementStatus, SolutionData, SolutionEvaluation, SolutionStatus, SourceType, Tradeoff,
};
pub use id_fields::{IdBearing, IdFieldSpec, IdRef, IdRefMut};
pub use kind::{EntityKind, ParseKindError};
pub use link::{Link, LinkData, RelationType};
pub use record::{new_entity_id, Entity, EntityData, EntityMetadata, Record};

/// Requirement record
pub type Requirement = Record<RequirementData>;
/// Solution record
pub type Solution = Record<SolutionData>;
/// Decision record
pub type Decision = Record<DecisionData>;
/// Phase record
pub type Phase = Record<PhaseData>;
/// Artifact record
pub type Artifact = Record<ArtifactData>;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
