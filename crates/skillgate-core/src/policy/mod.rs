//! Layered policy gates.
//!
//! Evaluation order is fixed: permission (RBAC), ABAC, risk, per-skill
//! policy, approval, budget, circuit breaker. See [`chain::GateChain`].

pub mod approval;
pub mod budget;
pub mod chain;
pub mod circuit;
pub mod engine;
pub mod permission;
pub mod risk;

use std::path::PathBuf;

pub use approval::ApprovalGate;
pub use budget::{BudgetCheck, BudgetManager};
pub use chain::{AuthorizeRequest, GateChain, GateMode, GateSubject};
pub use circuit::CircuitBreaker;
pub use engine::{ApprovalRequirement, PolicyEngine};
pub use permission::PermissionChecker;
pub use risk::{RiskAssessment, RiskScorer};

/// Errors loading a policy definition file.
#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Skill-id glob: `*` matches everything, a trailing `*` matches a prefix,
/// anything else must match exactly.
pub fn matches_glob(pattern: &str, skill_id: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return skill_id.starts_with(prefix);
    }
    pattern == skill_id
}
