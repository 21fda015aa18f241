//! Governance configuration types.
//!
//! `GovernanceConfig` is the `skillgate.toml` in the data directory. Every
//! section and field has a default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub router: RouterConfig,
    pub risk: RiskConfig,
    pub budget: BudgetConfig,
    pub circuit: CircuitConfig,
    pub approval: ApprovalConfig,
    pub composition: CompositionConfig,
    pub execution: ExecutionConfig,
}

/// Scoring weights and decision thresholds for the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    /// Top score below this yields `low_confidence`.
    pub min_confidence: f64,
    /// Runner-up within this distance of the top yields `ambiguous`.
    /// Zero disables the check.
    pub ambiguity_margin: f64,
    /// Routing cache TTL. Zero disables caching.
    pub cache_ttl_seconds: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.7,
            semantic_weight: 0.3,
            min_confidence: 0.2,
            ambiguity_margin: 0.0,
            cache_ttl_seconds: 60,
        }
    }
}

/// A weighted trigger phrase for the risk scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTrigger {
    pub phrase: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Score at or above which approval is required.
    pub threshold: f64,
    /// Extra score when two or more distinct triggers match.
    pub multi_trigger_bonus: f64,
    /// Replaces the built-in trigger list when non-empty.
    pub triggers: Vec<RiskTrigger>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            multi_trigger_bonus: 0.3,
            triggers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub per_request_limit: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    /// Remaining daily budget below which the cheap tier is selected.
    pub low_remaining_threshold: f64,
    pub standard_cost: f64,
    pub cheap_cost: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_request_limit: 5.0,
            daily_limit: 50.0,
            monthly_limit: 500.0,
            low_remaining_threshold: 5.0,
            standard_cost: 1.0,
            cheap_cost: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub window_seconds: u64,
    pub open_seconds: u64,
    pub half_open_max_attempts: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_seconds: 60,
            open_seconds: 30,
            half_open_max_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Shared approval token. When set, every approval must present it.
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Maximum concurrently running members of one parallel group.
    pub parallel_limit: usize,
    /// Maximum nesting depth of skill calls within one request.
    pub max_depth: usize,
    /// Default fail-fast flag for newly composed specs.
    pub fail_fast: bool,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            max_depth: 8,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker slots for synchronous entrypoints.
    pub blocking_workers: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            blocking_workers: 4,
        }
    }
}
