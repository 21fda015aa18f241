//! Execution plan and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::composition::Step;
use crate::gate::AuthorizationOutcome;
use crate::skill::SkillId;

/// An identified, execution-ready request against one skill or composition.
///
/// `plan_id` depends only on the skill id, the normalized payload and the
/// composition shape, so a preview and the later run share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub skill_id: SkillId,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
}

/// Dry-run output. Produced without invoking anything or charging budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub plan_id: String,
    pub skill_id: SkillId,
    /// Skills that would run, in first-execution order, deduplicated.
    pub affected_entities: Vec<SkillId>,
    /// Read-only gate evaluation at preview time.
    pub authorization: AuthorizationOutcome,
    pub plan: ExecutionPlan,
}

/// Either a real plan or a dry-run preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanOutcome {
    Plan(ExecutionPlan),
    Preview(Preview),
}

impl PlanOutcome {
    pub fn plan_id(&self) -> &str {
        match self {
            Self::Plan(p) => &p.plan_id,
            Self::Preview(p) => &p.plan_id,
        }
    }

    pub fn plan(&self) -> &ExecutionPlan {
        match self {
            Self::Plan(p) => p,
            Self::Preview(p) => &p.plan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionWarning {
    pub code: String,
    pub skill_id: SkillId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<SkillId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Blocked,
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One executed step, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub order: usize,
    pub step_id: SkillId,
    pub duration_ms: u64,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub skill_id: SkillId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: serde_json::Value,
    /// Reason / policy id when blocked, fault cause when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ExecutionWarning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationOutcome>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
