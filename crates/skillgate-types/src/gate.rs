//! Policy gate decision types.
//!
//! Reason and policy-id strings in [`reason`] are part of the external
//! contract. Callers match on them, so they never change once published.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable machine-readable reason / policy-id strings.
pub mod reason {
    pub const PERMISSION_GRANTED: &str = "permission_granted";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const PERMISSION_NOT_REQUIRED: &str = "permission_not_required";
    pub const ABAC_ALLOWED: &str = "abac_allowed";
    pub const ABAC_DENIED: &str = "abac_denied";

    pub const RISK_ASSESSED: &str = "risk_assessed";
    pub const POLICY_DEFAULT: &str = "policy_default";
    pub const POLICY_OVERRIDE: &str = "policy_override";

    pub const APPROVAL_NOT_REQUIRED: &str = "approval_not_required";
    pub const APPROVAL_GRANTED: &str = "approval_granted";
    pub const APPROVAL_REQUIRED: &str = "approval_required";
    pub const APPROVAL_DENIED: &str = "approval_denied";
    pub const APPROVAL_TOKEN_INVALID: &str = "approval_token_invalid";

    pub const BUDGET_OK: &str = "budget_ok";
    pub const BUDGET_EXCEEDED: &str = "budget_exceeded";
    pub const PER_REQUEST_LIMIT_EXCEEDED: &str = "per_request_limit_exceeded";
    pub const DAILY_LIMIT_EXCEEDED: &str = "daily_limit_exceeded";
    pub const MONTHLY_LIMIT_EXCEEDED: &str = "monthly_limit_exceeded";
    pub const INVALID_COST: &str = "invalid_cost";

    pub const CIRCUIT_CLOSED: &str = "circuit_closed";
    pub const CIRCUIT_HALF_OPEN: &str = "circuit_half_open";
    pub const CIRCUIT_OPEN: &str = "circuit_open";

    pub const COMPOSITION_INACTIVE: &str = "composition_inactive";
    pub const TESTS_MISSING: &str = "tests_missing";
    pub const TESTS_FAILED: &str = "tests_failed";
    pub const ACTIVATED: &str = "activated";

    pub const DEPRECATED_SKILL: &str = "deprecated_skill";
    pub const NOT_ROUTED: &str = "not_routed";
}

/// Which evaluator produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Permission,
    Abac,
    Risk,
    Policy,
    Approval,
    Budget,
    Circuit,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Permission => "permission",
            Self::Abac => "abac",
            Self::Risk => "risk",
            Self::Policy => "policy",
            Self::Approval => "approval",
            Self::Budget => "budget",
            Self::Circuit => "circuit",
        };
        f.write_str(s)
    }
}

/// One gate's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub gate: GateKind,
    pub allowed: bool,
    pub policy_id: String,
    pub reason: String,
    /// Remediation data for permission denials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_permissions: Vec<String>,
    /// Gate-specific structured detail (risk score, budget tier, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl GateDecision {
    pub fn allow(gate: GateKind, policy_id: impl Into<String>) -> Self {
        let policy_id = policy_id.into();
        Self {
            gate,
            allowed: true,
            reason: policy_id.clone(),
            policy_id,
            missing_permissions: Vec::new(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn deny(gate: GateKind, policy_id: impl Into<String>) -> Self {
        Self {
            allowed: false,
            ..Self::allow(gate, policy_id)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_missing(mut self, missing: Vec<String>) -> Self {
        self.missing_permissions = missing;
        self
    }
}

/// Caller-supplied approval state for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Denied,
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" | "approve" | "yes" => Ok(Self::Approved),
            "denied" | "deny" | "no" => Ok(Self::Denied),
            other => Err(format!("unknown approval status '{other}'")),
        }
    }
}

/// The whole chain's verdict: every evaluated gate in order, and the first
/// denial if there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationOutcome {
    pub allowed: bool,
    pub decisions: Vec<GateDecision>,
    /// Risk score computed for the request.
    pub risk_score: f64,
    pub requires_approval: bool,
    /// Estimated cost charged (or that would be charged) by the budget gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl AuthorizationOutcome {
    /// The terminal decision: the first denial, else the last decision.
    pub fn terminal(&self) -> Option<&GateDecision> {
        self.decisions
            .iter()
            .find(|d| !d.allowed)
            .or_else(|| self.decisions.last())
    }

    pub fn blocking_policy_id(&self) -> Option<&str> {
        self.decisions
            .iter()
            .find(|d| !d.allowed)
            .map(|d| d.policy_id.as_str())
    }
}
