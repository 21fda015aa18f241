//! Shared domain types for Skillgate.
//!
//! Skill descriptors, routing decisions, gate decisions, plans, compositions
//! and persisted governance records, plus their error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, semver, thiserror.

pub mod composition;
pub mod config;
pub mod error;
pub mod gate;
pub mod governance;
pub mod plan;
pub mod routing;
pub mod skill;
