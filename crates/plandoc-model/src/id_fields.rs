//! Explicit identifier-bearing field table per entity kind
//!
//! Only the fields listed here ever hold references to other entities.
//! Anything else (titles, descriptions, notes) is free text and is never
//! scanned or rewritten.

use crate::entities::{ArtifactData, DecisionData, PhaseData, RequirementData, SolutionData};
use crate::kind::EntityKind;
use crate::link::LinkData;

/// One identifier-bearing field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdFieldSpec {
    /// Dotted camelCase path as persisted (`source.parentId`)
    pub path: &'static str,
    /// Collection the id must exist in; `None` means any collection
    pub target: Option<EntityKind>,
    /// Whether the field is an array of ids
    pub many: bool,
}

impl IdFieldSpec {
    const fn single(path: &'static str, target: Option<EntityKind>) -> Self {
        Self {
            path,
            target,
            many: false,
        }
    }

    const fn many(path: &'static str, target: Option<EntityKind>) -> Self {
        Self {
            path,
            target,
            many: true,
        }
    }
}

/// Borrowed identifier value with its field description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRef<'a> {
    /// Field the value came from
    pub field: &'static IdFieldSpec,
    /// The identifier
    pub value: &'a str,
}

/// Mutable identifier slot with its field description
#[derive(Debug)]
pub struct IdRefMut<'a> {
    /// Field the slot belongs to
    pub field: &'static IdFieldSpec,
    /// The identifier, writable in place
    pub value: &'a mut String,
}

/// Payloads whose identifier-bearing fields are known statically
pub trait IdBearing {
    /// Field table for this payload
    const ID_FIELDS: &'static [IdFieldSpec];

    /// Every identifier currently stored in an id-bearing field
    fn id_refs(&self) -> Vec<IdRef<'_>>;

    /// Every identifier slot, for in-place rewriting
    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>>;
}

fn opt<'a>(out: &mut Vec<IdRef<'a>>, field: &'static IdFieldSpec, value: &'a Option<String>) {
    if let Some(value) = value {
        out.push(IdRef { field, value });
    }
}

fn opt_mut<'a>(
    out: &mut Vec<IdRefMut<'a>>,
    field: &'static IdFieldSpec,
    value: &'a mut Option<String>,
) {
    if let Some(value) = value {
        out.push(IdRefMut { field, value });
    }
}

fn each<'a>(out: &mut Vec<IdRef<'a>>, field: &'static IdFieldSpec, values: &'a [String]) {
    out.extend(values.iter().map(|value| IdRef { field, value }));
}

fn each_mut<'a>(
    out: &mut Vec<IdRefMut<'a>>,
    field: &'static IdFieldSpec,
    values: &'a mut [String],
) {
    out.extend(values.iter_mut().map(|value| IdRefMut { field, value }));
}

fn one<'a>(out: &mut Vec<IdRef<'a>>, field: &'static IdFieldSpec, value: &'a str) {
    out.push(IdRef { field, value });
}

fn one_mut<'a>(out: &mut Vec<IdRefMut<'a>>, field: &'static IdFieldSpec, value: &'a mut String) {
    out.push(IdRefMut { field, value });
}

impl IdBearing for RequirementData {
    const ID_FIELDS: &'static [IdFieldSpec] = &[IdFieldSpec::single(
        "source.parentId",
        Some(EntityKind::Requirement),
    )];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        opt(&mut out, &Self::ID_FIELDS[0], &self.source.parent_id);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        opt_mut(&mut out, &Self::ID_FIELDS[0], &mut self.source.parent_id);
        out
    }
}

impl IdBearing for SolutionData {
    const ID_FIELDS: &'static [IdFieldSpec] =
        &[IdFieldSpec::many("addressing", Some(EntityKind::Requirement))];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        each(&mut out, &Self::ID_FIELDS[0], &self.addressing);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        each_mut(&mut out, &Self::ID_FIELDS[0], &mut self.addressing);
        out
    }
}

impl IdBearing for DecisionData {
    const ID_FIELDS: &'static [IdFieldSpec] =
        &[IdFieldSpec::single("supersedes", Some(EntityKind::Decision))];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        opt(&mut out, &Self::ID_FIELDS[0], &self.supersedes);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        opt_mut(&mut out, &Self::ID_FIELDS[0], &mut self.supersedes);
        out
    }
}

impl IdBearing for PhaseData {
    const ID_FIELDS: &'static [IdFieldSpec] =
        &[IdFieldSpec::single("parentId", Some(EntityKind::Phase))];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        opt(&mut out, &Self::ID_FIELDS[0], &self.parent_id);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        opt_mut(&mut out, &Self::ID_FIELDS[0], &mut self.parent_id);
        out
    }
}

impl IdBearing for ArtifactData {
    const ID_FIELDS: &'static [IdFieldSpec] = &[
        IdFieldSpec::single("relatedPhaseId", Some(EntityKind::Phase)),
        IdFieldSpec::many("relatedRequirementIds", Some(EntityKind::Requirement)),
        IdFieldSpec::single("relatedSolutionId", Some(EntityKind::Solution)),
    ];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        opt(&mut out, &Self::ID_FIELDS[0], &self.related_phase_id);
        each(&mut out, &Self::ID_FIELDS[1], &self.related_requirement_ids);
        opt(&mut out, &Self::ID_FIELDS[2], &self.related_solution_id);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        opt_mut(&mut out, &Self::ID_FIELDS[0], &mut self.related_phase_id);
        each_mut(&mut out, &Self::ID_FIELDS[1], &mut self.related_requirement_ids);
        opt_mut(&mut out, &Self::ID_FIELDS[2], &mut self.related_solution_id);
        out
    }
}

impl IdBearing for LinkData {
    const ID_FIELDS: &'static [IdFieldSpec] = &[
        IdFieldSpec::single("sourceId", None),
        IdFieldSpec::single("targetId", None),
    ];

    fn id_refs(&self) -> Vec<IdRef<'_>> {
        let mut out = Vec::new();
        one(&mut out, &Self::ID_FIELDS[0], &self.source_id);
        one(&mut out, &Self::ID_FIELDS[1], &self.target_id);
        out
    }

    fn id_refs_mut(&mut self) -> Vec<IdRefMut<'_>> {
        let mut out = Vec::new();
        one_mut(&mut out, &Self::ID_FIELDS[0], &mut self.source_id);
        one_mut(&mut out, &Self::ID_FIELDS[1], &mut self.target_id);
        out
    }
}
