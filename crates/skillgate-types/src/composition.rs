//! Composition types: skills that are themselves DAGs of other skills.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::skill::SkillId;

/// One step of a composition.
///
/// `Single` runs sequentially and feeds its output to the next step.
/// `Parallel` runs every member concurrently with the same input and joins
/// their outputs in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Single(SkillId),
    Parallel(Vec<SkillId>),
}

impl Step {
    /// Member skill ids in declaration order.
    pub fn members(&self) -> &[SkillId] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::Parallel(ids) => ids,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel(_))
    }
}

/// Loosely-typed step as written by a caller: either a single id or a list.
/// Converted into [`Step`] during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepInput {
    Single(String),
    Group(Vec<String>),
}

impl From<&str> for StepInput {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<&str>> for StepInput {
    fn from(value: Vec<&str>) -> Self {
        Self::Group(value.into_iter().map(str::to_string).collect())
    }
}

/// Lifecycle status of a stored composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStatus {
    #[default]
    Draft,
    Active,
}

/// A stored test case run before activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionTest {
    pub name: String,
    pub payload: serde_json::Value,
    pub expected: serde_json::Value,
}

/// A persisted composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSpec {
    pub skill_id: SkillId,
    pub steps: Vec<Step>,
    pub version: Version,
    #[serde(default)]
    pub status: CompositionStatus,
    /// Set when any member (transitively) declares high risk or approval.
    #[serde(default)]
    pub risk_flagged: bool,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub tests: Vec<CompositionTest>,
    pub updated_at: DateTime<Utc>,
}

impl CompositionSpec {
    pub fn is_active(&self) -> bool {
        self.status == CompositionStatus::Active
    }

    /// Every member id across all steps, in declaration order.
    pub fn member_ids(&self) -> impl Iterator<Item = &SkillId> {
        self.steps.iter().flat_map(|s| s.members().iter())
    }
}

/// Result of an activation attempt. A refusal is a normal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub skill_id: SkillId,
    pub activated: bool,
    pub reason: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tests: Vec<String>,
}
