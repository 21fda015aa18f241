//! The ordered gate chain.
//!
//! Permission, ABAC, risk, policy and approval are pure reads. Budget and
//! circuit are read-only in [`GateMode::Evaluate`]; in [`GateMode::Record`]
//! the circuit reserves its slot and the budget charge is committed last,
//! only once every gate has allowed the request.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skillgate_types::error::RepositoryError;
use skillgate_types::gate::{ApprovalStatus, AuthorizationOutcome, GateDecision, GateKind, reason};
use skillgate_types::skill::{SkillDescriptor, SkillId};
use tracing::{debug, info};

use super::permission::AccessRequest;
use super::{
    ApprovalGate, BudgetManager, CircuitBreaker, PermissionChecker, PolicyEngine, RiskScorer,
};
use crate::repository::RecordStore;

/// Whether gates may write state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Dry run: nothing is reserved or charged.
    Evaluate,
    /// Real run: reserve circuit trials and charge budget on success.
    Record,
}

/// Caller context for an authorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub query: String,
    pub role: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub approval: Option<ApprovalStatus>,
    pub approval_token: Option<String>,
    /// Overrides the budget's tier-based estimate.
    pub estimated_cost: Option<f64>,
}

impl AuthorizeRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_approval(mut self, status: ApprovalStatus) -> Self {
        self.approval = Some(status);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.approval_token = Some(token.into());
        self
    }
}

/// What is being authorized: a catalog skill or a composition.
#[derive(Debug, Clone)]
pub struct GateSubject {
    pub skill_id: SkillId,
    pub tags: BTreeSet<String>,
    pub descriptor: Option<Arc<SkillDescriptor>>,
    /// Forces approval regardless of risk score.
    pub requires_approval: bool,
}

impl GateSubject {
    pub fn from_descriptor(descriptor: Arc<SkillDescriptor>) -> Self {
        Self {
            skill_id: descriptor.id.clone(),
            tags: descriptor.tags.clone(),
            requires_approval: descriptor.risk.requires_approval,
            descriptor: Some(descriptor),
        }
    }

    pub fn composite(skill_id: SkillId, tags: BTreeSet<String>, requires_approval: bool) -> Self {
        Self {
            skill_id,
            tags,
            descriptor: None,
            requires_approval,
        }
    }
}

pub struct GateChain<S> {
    permissions: PermissionChecker,
    risk: RiskScorer,
    policy: PolicyEngine,
    approval: ApprovalGate,
    budget: BudgetManager<S>,
    circuit: Arc<CircuitBreaker<S>>,
}

struct Trail {
    decisions: Vec<GateDecision>,
    risk_score: f64,
    requires_approval: bool,
    cost: Option<f64>,
}

impl Trail {
    fn finish(self, allowed: bool) -> AuthorizationOutcome {
        AuthorizationOutcome {
            allowed,
            decisions: self.decisions,
            risk_score: self.risk_score,
            requires_approval: self.requires_approval,
            cost: self.cost,
        }
    }
}

impl<S: RecordStore> GateChain<S> {
    pub fn new(
        permissions: PermissionChecker,
        risk: RiskScorer,
        policy: PolicyEngine,
        approval: ApprovalGate,
        budget: BudgetManager<S>,
        circuit: Arc<CircuitBreaker<S>>,
    ) -> Self {
        Self {
            permissions,
            risk,
            policy,
            approval,
            budget,
            circuit,
        }
    }

    pub fn budget(&self) -> &BudgetManager<S> {
        &self.budget
    }

    pub fn circuit(&self) -> &Arc<CircuitBreaker<S>> {
        &self.circuit
    }

    pub fn approval(&self) -> &ApprovalGate {
        &self.approval
    }

    /// Run every gate in order, halting at the first denial.
    pub async fn evaluate(
        &self,
        subject: &GateSubject,
        request: &AuthorizeRequest,
        mode: GateMode,
    ) -> Result<AuthorizationOutcome, RepositoryError> {
        let skill_id = subject.skill_id.as_str();
        let mut trail = Trail {
            decisions: Vec::with_capacity(7),
            risk_score: 0.0,
            requires_approval: false,
            cost: None,
        };

        let access = AccessRequest {
            skill_id,
            role: request.role.as_deref(),
            skill_tags: &subject.tags,
            attributes: &request.attributes,
        };
        for decision in [
            self.permissions.check_rbac(&access),
            self.permissions.check_abac(&access),
        ] {
            info!(
                event = "permission_decision",
                skill_id,
                gate = %decision.gate,
                allowed = decision.allowed,
                policy_id = %decision.policy_id,
                "access check"
            );
            let allowed = decision.allowed;
            trail.decisions.push(decision);
            if !allowed {
                return Ok(trail.finish(false));
            }
        }

        let mut risk = self
            .risk
            .assess(&request.query, skill_id, subject.descriptor.as_deref());
        risk.requires_approval |= subject.requires_approval;
        trail.risk_score = risk.score;
        trail.decisions.push(
            GateDecision::allow(GateKind::Risk, reason::RISK_ASSESSED).with_detail(
                serde_json::json!({ "score": risk.score, "triggers": risk.triggers }),
            ),
        );

        let requirement = self.policy.requirement(skill_id, &risk);
        trail.requires_approval = requirement.required;
        info!(
            event = "policy_decision",
            skill_id,
            allowed = true,
            policy_id = %requirement.policy_id,
            requires_approval = requirement.required,
            "approval requirement resolved"
        );
        trail.decisions.push(
            GateDecision::allow(GateKind::Policy, requirement.policy_id.clone()).with_detail(
                serde_json::json!({
                    "requires_approval": requirement.required,
                    "overridden": requirement.overridden,
                }),
            ),
        );

        let approval = self.approval.evaluate(
            &requirement,
            request.approval,
            request.approval_token.as_deref(),
        );
        info!(
            event = "policy_decision",
            skill_id,
            allowed = approval.allowed,
            policy_id = %approval.policy_id,
            "approval check"
        );
        let approved = approval.allowed;
        trail.decisions.push(approval);
        if !approved {
            return Ok(trail.finish(false));
        }

        let budget = self.budget.evaluate(request.estimated_cost).await?;
        trail.cost = Some(budget.estimated_cost);
        let budget_index = trail.decisions.len();
        trail.decisions.push(budget.to_gate_decision());
        if !budget.allowed {
            return Ok(trail.finish(false));
        }

        let circuit = match mode {
            GateMode::Evaluate => self.circuit.peek(skill_id).await?,
            GateMode::Record => self.circuit.allow(skill_id).await?,
        };
        let circuit_allowed = circuit.allowed;
        trail.decisions.push(circuit);
        if !circuit_allowed {
            return Ok(trail.finish(false));
        }

        if mode == GateMode::Record {
            let committed = self.budget.authorize(request.estimated_cost).await?;
            trail.cost = Some(committed.estimated_cost);
            trail.decisions[budget_index] = committed.to_gate_decision();
            if !committed.allowed {
                // Lost a race for the last of the budget; hand the trial back.
                self.circuit.release(skill_id).await?;
                return Ok(trail.finish(false));
            }
        }

        debug!(skill_id, mode = ?mode, "all gates passed");
        Ok(trail.finish(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::engine::SkillPolicy;
    use crate::policy::permission::{PermissionConfig, PermissionPolicy};
    use crate::repository::InMemoryRecordStore;
    use chrono::{TimeZone, Utc};
    use skillgate_types::config::{BudgetConfig, CircuitConfig, RiskConfig};
    use skillgate_types::governance::BudgetUsage;

    struct Fixture {
        chain: GateChain<InMemoryRecordStore>,
    }

    fn fixture(permissions: PermissionConfig, policies: Vec<SkillPolicy>, token: Option<&str>) -> Fixture {
        let store = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let budget = BudgetManager::new(
            Arc::clone(&store),
            BudgetConfig {
                daily_limit: 2.0,
                low_remaining_threshold: 0.0,
                ..BudgetConfig::default()
            },
            clock.clone(),
        );
        let circuit = Arc::new(CircuitBreaker::new(
            store,
            CircuitConfig {
                failure_threshold: 1,
                ..CircuitConfig::default()
            },
            clock,
        ));
        Fixture {
            chain: GateChain::new(
                PermissionChecker::new(permissions),
                RiskScorer::new(&RiskConfig::default()),
                PolicyEngine::from_policies(policies),
                ApprovalGate::new(token.map(str::to_string)),
                budget,
                circuit,
            ),
        }
    }

    fn subject(raw: &str) -> GateSubject {
        GateSubject::from_descriptor(Arc::new(SkillDescriptor::new(
            SkillId::parse(raw).unwrap(),
            "builtin:echo",
        )))
    }

    async fn usage(f: &Fixture) -> BudgetUsage {
        f.chain.budget().usage().await.unwrap()
    }

    #[tokio::test]
    async fn test_all_gates_pass_and_charge() {
        let f = fixture(PermissionConfig::default(), vec![], None);
        let outcome = f
            .chain
            .evaluate(&subject("text/echo"), &AuthorizeRequest::new("echo hi"), GateMode::Record)
            .await
            .unwrap();
        assert!(outcome.allowed);
        let gates: Vec<GateKind> = outcome.decisions.iter().map(|d| d.gate).collect();
        assert_eq!(
            gates,
            vec![
                GateKind::Permission,
                GateKind::Abac,
                GateKind::Risk,
                GateKind::Policy,
                GateKind::Approval,
                GateKind::Budget,
                GateKind::Circuit,
            ]
        );
        assert_eq!(usage(&f).await.day_total("2026-01-01"), 1.0);
    }

    #[tokio::test]
    async fn test_permission_denial_halts_without_charge() {
        let f = fixture(
            PermissionConfig {
                policies: vec![PermissionPolicy {
                    skill_id: "finance/*".into(),
                    required_permissions: vec!["finance:write".into()],
                }],
                ..PermissionConfig::default()
            },
            vec![],
            None,
        );
        let outcome = f
            .chain
            .evaluate(
                &subject("finance/close_books"),
                &AuthorizeRequest::new("close the books").with_role("analyst"),
                GateMode::Record,
            )
            .await
            .unwrap();
        assert!(!outcome.allowed);
        assert_eq!(outcome.blocking_policy_id(), Some(reason::PERMISSION_DENIED));
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(usage(&f).await, BudgetUsage::default());
    }

    #[tokio::test]
    async fn test_high_risk_requires_approval_without_charge() {
        let f = fixture(PermissionConfig::default(), vec![], None);
        let outcome = f
            .chain
            .evaluate(
                &subject("admin/delete_records"),
                &AuthorizeRequest::new("delete all records"),
                GateMode::Record,
            )
            .await
            .unwrap();
        assert!(!outcome.allowed);
        assert!(outcome.requires_approval);
        assert_eq!(outcome.blocking_policy_id(), Some(reason::APPROVAL_REQUIRED));
        assert_eq!(usage(&f).await, BudgetUsage::default());
    }

    #[tokio::test]
    async fn test_policy_override_and_denial() {
        let f = fixture(
            PermissionConfig::default(),
            vec![SkillPolicy {
                skill_id: "finance/close_books".into(),
                requires_approval: Some(true),
                policy_id: Some("close_books_policy".into()),
            }],
            None,
        );
        let outcome = f
            .chain
            .evaluate(
                &subject("finance/close_books"),
                &AuthorizeRequest::new("generate summary").with_approval(ApprovalStatus::Denied),
                GateMode::Record,
            )
            .await
            .unwrap();
        assert!(outcome.requires_approval);
        let policy = outcome
            .decisions
            .iter()
            .find(|d| d.gate == GateKind::Policy)
            .unwrap();
        assert_eq!(policy.policy_id, "close_books_policy");
        assert_eq!(outcome.blocking_policy_id(), Some(reason::APPROVAL_DENIED));
    }

    #[tokio::test]
    async fn test_token_mismatch_blocks_approved_request() {
        let f = fixture(PermissionConfig::default(), vec![], Some("s3cret"));
        let outcome = f
            .chain
            .evaluate(
                &subject("admin/delete_records"),
                &AuthorizeRequest::new("delete all records")
                    .with_approval(ApprovalStatus::Approved)
                    .with_token("wrong"),
                GateMode::Record,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.blocking_policy_id(),
            Some(reason::APPROVAL_TOKEN_INVALID)
        );
        assert_eq!(usage(&f).await, BudgetUsage::default());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_blocks_third_call() {
        let f = fixture(PermissionConfig::default(), vec![], None);
        let request = AuthorizeRequest::new("echo");
        for _ in 0..2 {
            let ok = f
                .chain
                .evaluate(&subject("text/echo"), &request, GateMode::Record)
                .await
                .unwrap();
            assert!(ok.allowed);
        }
        let third = f
            .chain
            .evaluate(&subject("text/echo"), &request, GateMode::Record)
            .await
            .unwrap();
        assert_eq!(third.blocking_policy_id(), Some(reason::DAILY_LIMIT_EXCEEDED));
        assert_eq!(usage(&f).await.day_total("2026-01-01"), 2.0);
    }

    #[tokio::test]
    async fn test_open_circuit_blocks_without_charge() {
        let f = fixture(PermissionConfig::default(), vec![], None);
        f.chain.circuit().record_failure("text/echo").await.unwrap();
        let outcome = f
            .chain
            .evaluate(&subject("text/echo"), &AuthorizeRequest::new("echo"), GateMode::Record)
            .await
            .unwrap();
        assert_eq!(outcome.blocking_policy_id(), Some(reason::CIRCUIT_OPEN));
        assert_eq!(usage(&f).await, BudgetUsage::default());
    }

    #[tokio::test]
    async fn test_evaluate_mode_writes_nothing() {
        let f = fixture(PermissionConfig::default(), vec![], None);
        for _ in 0..5 {
            let outcome = f
                .chain
                .evaluate(&subject("text/echo"), &AuthorizeRequest::new("echo"), GateMode::Evaluate)
                .await
                .unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.cost, Some(1.0));
        }
        assert_eq!(usage(&f).await, BudgetUsage::default());
    }
}
