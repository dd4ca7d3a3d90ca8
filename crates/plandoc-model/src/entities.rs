//! Kind-specific entity payloads
//!
//! Every payload derives `Default` so batch callers and tests can spell
//! out only the fields they care about.

use crate::kind::EntityKind;
use crate::record::EntityData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shared priority scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Must be done first
    Critical,
    /// Important
    High,
    /// Default priority
    #[default]
    Medium,
    /// Nice to have
    Low,
}

// =============================================================================
// Requirement
// =============================================================================

/// Where a requirement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Asked for by a user
    #[default]
    UserRequest,
    /// Found during analysis
    Discovered,
    /// Produced by tooling
    Generated,
    /// Split off another requirement
    Derived,
}

/// Provenance of a requirement
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSource {
    /// Provenance category
    #[serde(rename = "type", default)]
    pub source_type: SourceType,
    /// Parent requirement when `source_type` is `Derived`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Free-text context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementCategory {
    #[default]
    Functional,
    NonFunctional,
    Technical,
    Business,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    #[default]
    Draft,
    Approved,
    Implemented,
    Deferred,
    Rejected,
}

/// Requirement payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequirementData {
    /// Short title
    pub title: String,
    /// Long description
    pub description: String,
    /// Why this requirement exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Provenance
    pub source: RequirementSource,
    /// Testable acceptance criteria
    pub acceptance_criteria: Vec<String>,
    /// Priority
    pub priority: Priority,
    /// Category
    pub category: RequirementCategory,
    /// Lifecycle status
    pub status: RequirementStatus,
}

impl RequirementData {
    /// Requirement with only a title
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

impl EntityData for RequirementData {
    const KIND: EntityKind = EntityKind::Requirement;
}

// =============================================================================
// Solution
// =============================================================================

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortUnit {
    Minutes,
    #[default]
    Hours,
    Days,
    Weeks,
    StoryPoints,
}

/// Effort estimate with a confidence label
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EffortEstimate {
    /// Magnitude in `unit`
    pub value: f64,
    /// Unit of `value`
    pub unit: EffortUnit,
    /// Confidence label (`low`/`medium`/`high`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feasibility {
    High,
    #[default]
    Medium,
    Low,
}

/// One axis of a solution trade-off analysis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tradeoff {
    /// What is being compared
    pub aspect: String,
    /// Advantages
    pub pros: Vec<String>,
    /// Disadvantages
    pub cons: Vec<String>,
    /// Optional score (0-10)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Evaluation summary of a solution
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolutionEvaluation {
    /// Expected effort
    pub effort_estimate: EffortEstimate,
    /// Technical feasibility
    pub technical_feasibility: Feasibility,
    /// Free-text risk notes
    pub risk_assessment: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    #[default]
    Proposed,
    Evaluating,
    Selected,
    Rejected,
    Implemented,
}

/// Solution payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolutionData {
    /// Short title
    pub title: String,
    /// Long description
    pub description: String,
    /// Technical approach
    pub approach: String,
    /// Notes for implementers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_notes: Option<String>,
    /// Requirement ids this solution addresses
    pub addressing: Vec<String>,
    /// Trade-off analysis
    pub tradeoffs: Vec<Tradeoff>,
    /// Evaluation summary
    pub evaluation: SolutionEvaluation,
    /// Lifecycle status
    pub status: SolutionStatus,
    /// Why it was selected, once selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_reason: Option<String>,
}

impl SolutionData {
    /// Solution with a title, addressing the given requirements
    #[must_use]
    pub fn addressing(title: impl Into<String>, requirement_ids: Vec<String>) -> Self {
        Self {
            title: title.into(),
            addressing: requirement_ids,
            ..Self::default()
        }
    }
}

impl EntityData for SolutionData {
    const KIND: EntityKind = EntityKind::Solution;
}

// =============================================================================
// Decision
// =============================================================================

/// An option that was considered and not chosen
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alternative {
    /// The option
    pub option: String,
    /// Why it was not chosen
    pub reasoning: String,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Active,
    Superseded,
    Reversed,
}

/// Decision payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecisionData {
    /// Short title
    pub title: String,
    /// The question being decided
    pub question: String,
    /// Background
    pub context: String,
    /// What was decided
    pub decision: String,
    /// Expected consequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consequences: Option<String>,
    /// Alternatives considered
    pub alternatives_considered: Vec<Alternative>,
    /// Lifecycle status
    pub status: DecisionStatus,
    /// Decision this one replaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl EntityData for DecisionData {
    const KIND: EntityKind = EntityKind::Decision;
}

// =============================================================================
// Phase
// =============================================================================

/// Planned and actual schedule of a phase
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhaseSchedule {
    /// Planned effort
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<EffortEstimate>,
    /// Effort spent so far, in the estimate's unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_effort: Option<f64>,
    /// Planned start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Planned end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

/// Phase payload
///
/// `depth`, `path` and `order` are derived from the parent when the phase
/// is created through the batch engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhaseData {
    /// Short title
    pub title: String,
    /// Long description
    pub description: String,
    /// Parent phase, `None` for top-level phases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// 1-based position among siblings (0 = assign on create)
    pub order: u32,
    /// Nesting depth (0 = top-level)
    pub depth: u32,
    /// Slash-separated ancestry of ids
    pub path: String,
    /// Objectives
    pub objectives: Vec<String>,
    /// Deliverables
    pub deliverables: Vec<String>,
    /// Success criteria
    pub success_criteria: Vec<String>,
    /// Schedule
    pub schedule: PhaseSchedule,
    /// Lifecycle status
    pub status: PhaseStatus,
    /// Completion percentage (0-100)
    pub progress: u8,
    /// Priority
    pub priority: Priority,
    /// Why the phase is blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_reason: Option<String>,
    /// Notes for implementers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_notes: Option<String>,
}

impl PhaseData {
    /// Phase with a title under an optional parent
    #[must_use]
    pub fn titled(title: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            title: title.into(),
            parent_id,
            ..Self::default()
        }
    }
}

impl EntityData for PhaseData {
    const KIND: EntityKind = EntityKind::Phase;
}

// =============================================================================
// Artifact
// =============================================================================

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    #[default]
    Code,
    Config,
    Migration,
    Documentation,
    Test,
    Script,
    Other,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    #[default]
    Draft,
    Reviewed,
    Approved,
    Implemented,
    Outdated,
}

/// Body of a generated artifact
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactContent {
    /// Source language
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Source text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    /// Suggested file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Artifact payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactData {
    /// Short title
    pub title: String,
    /// Long description
    pub description: String,
    /// What kind of artifact
    pub artifact_type: ArtifactType,
    /// Lifecycle status
    pub status: ArtifactStatus,
    /// Body
    pub content: ArtifactContent,
    /// Phase that produced it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_phase_id: Option<String>,
    /// Requirements it fulfils
    pub related_requirement_ids: Vec<String>,
    /// Solution it implements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_solution_id: Option<String>,
}

impl EntityData for ArtifactData {
    const KIND: EntityKind = EntityKind::Artifact;
}
