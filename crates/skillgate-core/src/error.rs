//! Fault taxonomy for orchestration.
//!
//! Gate denials are not errors; they travel as `GateDecision` values and
//! `ExecutionStatus::Blocked` results. What lives here is either rejected up
//! front (`CompositionError`), fatal to the request (`RecursionError`), or a
//! storage failure.

use skillgate_types::error::{RepositoryError, SkillError};
use thiserror::Error;

/// Invalid composition, rejected at compose time before anything is persisted.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("composition has no steps")]
    Empty,

    #[error("step {index} contains a blank entry")]
    BlankEntry { index: usize },

    #[error("step {index} is an empty parallel group")]
    EmptyGroup { index: usize },

    #[error("step {index} lists '{skill_id}' more than once")]
    DuplicateMember { index: usize, skill_id: String },

    #[error("composition '{0}' references itself")]
    SelfReference(String),

    #[error("circular composition: {0}")]
    Cycle(String),

    #[error("unknown skill '{0}'")]
    UnknownSkill(String),

    #[error("'{0}' is already a catalog skill")]
    ShadowsSkill(String),

    #[error("skill '{skill_id}' does not accept a single payload argument")]
    ContractMismatch { skill_id: String },

    #[error("composition '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    InvalidId(#[from] SkillError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Re-entrant or runaway execution. Always fatal to the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecursionError {
    #[error("circular dependency: {} -> {skill_id}", stack.join(" -> "))]
    Circular { skill_id: String, stack: Vec<String> },

    #[error("maximum call depth {max_depth} exceeded entering '{skill_id}'")]
    DepthExceeded { skill_id: String, max_depth: usize },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Recursion(#[from] RecursionError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Skill(#[from] SkillError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
