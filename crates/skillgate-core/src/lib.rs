//! Business logic and store trait definitions for Skillgate.
//!
//! This crate defines the "ports" (record store, catalog, capability
//! registry, plan hasher) that the infrastructure layer implements. It
//! depends only on `skillgate-types` -- never on `skillgate-infra` or any
//! database/IO crate.

pub mod catalog;
pub mod clock;
pub mod composition;
pub mod error;
pub mod feedback;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod repository;
pub mod router;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use orchestrator::{Orchestrator, OrchestratorBuilder, QueryOutcome};
