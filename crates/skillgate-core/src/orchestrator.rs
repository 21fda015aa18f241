//! Request orchestration: route, authorize, plan, compose, execute.
//!
//! Control flow for one request is router -> gate chain -> planner ->
//! (composition engine | direct invocation) -> runtime. Blocked requests
//! come back as `ExecutionStatus::Blocked` results; only recursion and
//! storage faults surface as `Err`.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skillgate_types::composition::{
    ActivationResult, CompositionSpec, CompositionStatus, CompositionTest, Step, StepInput,
};
use skillgate_types::config::GovernanceConfig;
use skillgate_types::error::{RepositoryError, SkillError};
use skillgate_types::gate::{ApprovalStatus, AuthorizationOutcome, reason};
use skillgate_types::governance::{BudgetUsage, CircuitRecord, FeedbackKind, FeedbackRecord};
use skillgate_types::plan::{
    ExecutionPlan, ExecutionResult, ExecutionStatus, ExecutionWarning, PlanOutcome,
};
use skillgate_types::routing::{ExecutionMode, RoutingDecision};
use skillgate_types::skill::{SkillDescriptor, SkillId};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogSnapshot, SkillCatalog};
use crate::clock::Clock;
use crate::composition::{
    CompositionEngine, CompositionRegistry, StepFailure, StepRunner, affected_entities,
};
use crate::error::{CompositionError, OrchestratorError};
use crate::feedback::{FeedbackSettings, FeedbackTracker};
use crate::planner::{PlanHasher, Planner};
use crate::policy::{
    ApprovalGate, ApprovalRequirement, AuthorizeRequest, BudgetManager, CircuitBreaker, GateChain,
    GateMode, GateSubject, PermissionChecker, PolicyEngine, RiskScorer,
};
use crate::repository::RecordStore;
use crate::router::mode::{select_mode, split_query};
use crate::router::{RouteRequest, RoutingCache, SkillRouter};
use crate::runtime::{CallContext, CapabilityRegistry, EntrypointInvoker, ExecutionFault};

/// Skill id under which ad-hoc pipelines are planned and reported.
pub const PIPELINE_SKILL_ID: &str = "pipeline/ad_hoc";

const COMPOSITION_STEP_EVENT: &str = "composition_step";
const PIPELINE_STEP_EVENT: &str = "pipeline_step";

/// Routing decisions for a free-text request and, when every part was
/// selected, the execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub mode: ExecutionMode,
    pub decisions: Vec<RoutingDecision>,
    pub result: Option<ExecutionResult>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder<S> {
    config: GovernanceConfig,
    store: Arc<S>,
    catalog: Arc<dyn SkillCatalog>,
    capabilities: Arc<dyn CapabilityRegistry>,
    hasher: Arc<dyn PlanHasher>,
    clock: Arc<dyn Clock>,
    permissions: PermissionChecker,
    policies: PolicyEngine,
    feedback: FeedbackSettings,
}

impl<S: RecordStore> OrchestratorBuilder<S> {
    pub fn permissions(mut self, permissions: PermissionChecker) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn policies(mut self, policies: PolicyEngine) -> Self {
        self.policies = policies;
        self
    }

    pub fn feedback_settings(mut self, settings: FeedbackSettings) -> Self {
        self.feedback = settings;
        self
    }

    pub fn build(self) -> Orchestrator<S> {
        let config = self.config;
        let budget = BudgetManager::new(
            Arc::clone(&self.store),
            config.budget.clone(),
            Arc::clone(&self.clock),
        );
        let circuit = Arc::new(CircuitBreaker::new(
            Arc::clone(&self.store),
            config.circuit.clone(),
            Arc::clone(&self.clock),
        ));
        let gates = GateChain::new(
            self.permissions,
            RiskScorer::new(&config.risk),
            self.policies,
            ApprovalGate::new(config.approval.token.clone()),
            budget,
            circuit,
        );

        Orchestrator {
            inner: Arc::new(Inner {
                router: SkillRouter::new(config.router.clone()),
                cache: RoutingCache::new(config.router.cache_ttl_seconds, Arc::clone(&self.clock)),
                feedback: FeedbackTracker::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                    self.feedback,
                ),
                gates,
                planner: Planner::new(self.hasher, Arc::clone(&self.clock)),
                compositions: CompositionRegistry::new(Arc::clone(&self.store), self.clock),
                engine: CompositionEngine::new(config.composition.parallel_limit),
                invoker: EntrypointInvoker::new(
                    self.capabilities,
                    config.execution.blocking_workers,
                ),
                catalog: self.catalog,
                max_depth: config.composition.max_depth,
                fail_fast: config.composition.fail_fast,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    catalog: Arc<dyn SkillCatalog>,
    router: SkillRouter,
    cache: RoutingCache,
    feedback: FeedbackTracker<S>,
    gates: GateChain<S>,
    planner: Planner,
    compositions: CompositionRegistry<S>,
    engine: CompositionEngine,
    invoker: EntrypointInvoker,
    max_depth: usize,
    fail_fast: bool,
}

/// What a skill id resolves to at execution time.
enum Target {
    Skill(Arc<SkillDescriptor>),
    Composition(CompositionSpec),
}

impl<S: RecordStore> Orchestrator<S> {
    pub fn builder(
        config: GovernanceConfig,
        store: Arc<S>,
        catalog: Arc<dyn SkillCatalog>,
        capabilities: Arc<dyn CapabilityRegistry>,
        hasher: Arc<dyn PlanHasher>,
        clock: Arc<dyn Clock>,
    ) -> OrchestratorBuilder<S> {
        OrchestratorBuilder {
            config,
            store,
            catalog,
            capabilities,
            hasher,
            clock,
            permissions: PermissionChecker::default(),
            policies: PolicyEngine::from_policies(Vec::new()),
            feedback: FeedbackSettings::default(),
        }
    }

    /// Load persisted feedback so routing sees it from the first request.
    pub async fn warm(&self) -> Result<usize, RepositoryError> {
        self.inner.feedback.warm().await
    }

    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.inner.catalog.snapshot()
    }

    // -- Routing ------------------------------------------------------------

    pub fn route(&self, tenant: &str, request: &RouteRequest) -> RoutingDecision {
        if let Some(hit) = self.inner.cache.get(tenant, request) {
            debug!(tenant, query = %request.query, "routing cache hit");
            return hit;
        }
        let snapshot = self.inner.catalog.snapshot();
        let decision = self
            .inner
            .router
            .route(&snapshot, request, &self.inner.feedback);
        self.inner.cache.insert(tenant, request, decision.clone());
        decision
    }

    pub async fn record_feedback(
        &self,
        skill_id: &SkillId,
        kind: FeedbackKind,
    ) -> Result<FeedbackRecord, RepositoryError> {
        let record = self.inner.feedback.record(skill_id, kind).await?;
        self.inner.cache.clear();
        Ok(record)
    }

    // -- Governance ---------------------------------------------------------

    /// Evaluate every gate without reserving or charging anything.
    pub async fn authorize(
        &self,
        skill_id: &SkillId,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizationOutcome, OrchestratorError> {
        let target = self.inner.resolve(skill_id).await?;
        let subject = self.inner.subject(&target).await?;
        Ok(self
            .inner
            .gates
            .evaluate(&subject, request, GateMode::Evaluate)
            .await?)
    }

    pub async fn budget_usage(&self) -> Result<BudgetUsage, RepositoryError> {
        self.inner.gates.budget().usage().await
    }

    pub async fn circuit_state(&self, skill_id: &SkillId) -> Result<CircuitRecord, RepositoryError> {
        self.inner.gates.circuit().state(skill_id.as_str()).await
    }

    // -- Planning -----------------------------------------------------------

    /// Build a plan for `skill_id`. With `dry_run`, nothing is invoked or
    /// charged and a [`Preview`](skillgate_types::plan::Preview) is returned.
    #[tracing::instrument(skip_all, fields(skill_id = %skill_id, dry_run = dry_run))]
    pub async fn plan(
        &self,
        skill_id: &SkillId,
        payload: Value,
        dry_run: bool,
        request: &AuthorizeRequest,
    ) -> Result<PlanOutcome, OrchestratorError> {
        let target = self.inner.resolve(skill_id).await?;
        let steps = match &target {
            Target::Skill(_) => Vec::new(),
            Target::Composition(spec) => spec.steps.clone(),
        };
        let plan = self.inner.planner.build(skill_id.clone(), payload, steps);
        if !dry_run {
            return Ok(PlanOutcome::Plan(plan));
        }

        let affected = match &target {
            Target::Skill(descriptor) => vec![descriptor.id.clone()],
            Target::Composition(spec) => {
                affected_entities(&spec.steps, &self.inner.compositions.all().await?)
            }
        };
        let subject = self.inner.subject(&target).await?;
        let authorization = self
            .inner
            .gates
            .evaluate(&subject, request, GateMode::Evaluate)
            .await?;
        info!(
            plan_id = %plan.plan_id,
            allowed = authorization.allowed,
            affected = affected.len(),
            "dry-run preview"
        );
        Ok(PlanOutcome::Preview(
            self.inner.planner.preview(plan, affected, authorization),
        ))
    }

    // -- Compositions -------------------------------------------------------

    pub async fn compose(
        &self,
        skill_id: &SkillId,
        steps: &[StepInput],
        fail_fast: Option<bool>,
    ) -> Result<CompositionSpec, OrchestratorError> {
        let snapshot = self.inner.catalog.snapshot();
        Ok(self
            .inner
            .compositions
            .compose(
                skill_id,
                steps,
                &snapshot,
                fail_fast.unwrap_or(self.inner.fail_fast),
            )
            .await?)
    }

    pub async fn add_test(
        &self,
        skill_id: &SkillId,
        test: CompositionTest,
    ) -> Result<CompositionSpec, OrchestratorError> {
        Ok(self.inner.compositions.add_test(skill_id, test).await?)
    }

    pub async fn composition(
        &self,
        skill_id: &SkillId,
    ) -> Result<Option<CompositionSpec>, RepositoryError> {
        self.inner.compositions.get(skill_id).await
    }

    /// Activate a composition. Refusals are returned as values with
    /// `activated = false` and a reason code.
    #[tracing::instrument(skip_all, fields(skill_id = %skill_id, require_tests = require_tests))]
    pub async fn activate(
        &self,
        skill_id: &SkillId,
        approval: Option<ApprovalStatus>,
        approval_token: Option<&str>,
        require_tests: bool,
    ) -> Result<ActivationResult, OrchestratorError> {
        let spec = self
            .inner
            .compositions
            .get(skill_id)
            .await?
            .ok_or_else(|| CompositionError::NotFound(skill_id.to_string()))?;

        let refuse = |code: &str, failed_tests: Vec<String>| {
            info!(skill_id = %skill_id, reason = code, "activation refused");
            ActivationResult {
                skill_id: skill_id.clone(),
                activated: false,
                reason: code.to_string(),
                version: spec.version.clone(),
                failed_tests,
            }
        };

        if require_tests {
            if spec.tests.is_empty() {
                return Ok(refuse(reason::TESTS_MISSING, Vec::new()));
            }
            let failed = self.inner.run_tests(&spec).await?;
            if !failed.is_empty() {
                return Ok(refuse(reason::TESTS_FAILED, failed));
            }
        }

        if spec.risk_flagged {
            let requirement = ApprovalRequirement {
                required: true,
                policy_id: reason::POLICY_DEFAULT.to_string(),
                overridden: false,
            };
            let decision = self
                .inner
                .gates
                .approval()
                .evaluate(&requirement, approval, approval_token);
            if !decision.allowed {
                return Ok(refuse(&decision.policy_id, Vec::new()));
            }
        }

        let active = self
            .inner
            .compositions
            .set_status(skill_id, CompositionStatus::Active)
            .await?;
        info!(skill_id = %skill_id, version = %active.version, "composition activated");
        Ok(ActivationResult {
            skill_id: skill_id.clone(),
            activated: true,
            reason: reason::ACTIVATED.to_string(),
            version: active.version,
            failed_tests: Vec::new(),
        })
    }

    // -- Execution ----------------------------------------------------------

    /// Execute a plan. Every gate is re-evaluated; the plan id is reused.
    #[tracing::instrument(skip_all, fields(plan_id = %plan.plan_id, skill_id = %plan.skill_id))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        request: &AuthorizeRequest,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let inner = &self.inner;
        let target = inner.resolve(&plan.skill_id).await?;
        let ctx = CallContext::new(inner.max_depth).enter(&plan.skill_id)?;
        let mut result = ExecutionResult {
            plan_id: plan.plan_id.clone(),
            skill_id: plan.skill_id.clone(),
            status: ExecutionStatus::Success,
            output: Value::Null,
            reason: None,
            warnings: Vec::new(),
            steps: Vec::new(),
            authorization: None,
        };

        if let Target::Composition(spec) = &target {
            if !spec.is_active() {
                result.status = ExecutionStatus::Blocked;
                result.reason = Some(reason::COMPOSITION_INACTIVE.to_string());
                return Ok(result);
            }
            if spec.steps != plan.steps {
                warn!(skill_id = %plan.skill_id, "composition changed since planning; running current version");
            }
        }

        let subject = inner.subject(&target).await?;
        let authorization = inner
            .gates
            .evaluate(&subject, request, GateMode::Record)
            .await?;
        let allowed = authorization.allowed;
        result.reason = authorization.blocking_policy_id().map(str::to_string);
        result.authorization = Some(authorization);
        if !allowed {
            result.status = ExecutionStatus::Blocked;
            return Ok(result);
        }

        match target {
            Target::Skill(descriptor) => {
                result.warnings.extend(deprecation_warning(&descriptor));
                let outcome = inner
                    .invoker
                    .invoke(&descriptor, plan.payload.clone(), &ctx)
                    .await;
                inner.settle_circuit(&descriptor.id, outcome.as_ref().err()).await?;
                match outcome {
                    Ok(output) => result.output = output,
                    Err(fault) => {
                        warn!(skill_id = %descriptor.id, error = %fault, "execution fault");
                        result.status = ExecutionStatus::Failed;
                        result.reason = Some(fault.to_string());
                    }
                }
            }
            Target::Composition(spec) => {
                result.warnings = inner.member_warnings(&spec.steps).await?;
                let runner = Arc::new(MemberRunner {
                    inner: Arc::clone(inner),
                    gating: Gating::Circuit,
                    event: COMPOSITION_STEP_EVENT,
                });
                let report = inner
                    .engine
                    .run(
                        runner,
                        &spec.steps,
                        plan.payload.clone(),
                        &ctx,
                        spec.fail_fast,
                        COMPOSITION_STEP_EVENT,
                    )
                    .await;
                result.steps = report.steps;
                match report.output {
                    Ok(output) => {
                        inner.settle_circuit(&spec.skill_id, None).await?;
                        result.output = output;
                    }
                    Err(failure) => {
                        if let StepFailure::Fault(fault) = &failure {
                            inner.settle_circuit(&spec.skill_id, Some(fault)).await?;
                        } else {
                            inner.gates.circuit().release(spec.skill_id.as_str()).await?;
                        }
                        apply_failure(&mut result, failure)?;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Run an unregistered step list, gating every member individually.
    #[tracing::instrument(skip_all, fields(steps = steps.len()))]
    pub async fn run_pipeline(
        &self,
        steps: Vec<Step>,
        payload: Value,
        request: &AuthorizeRequest,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let inner = &self.inner;
        let pipeline_id = SkillId::parse(PIPELINE_SKILL_ID)?;
        let plan = inner.planner.build(pipeline_id.clone(), payload, steps);
        let ctx = CallContext::new(inner.max_depth);

        let runner = Arc::new(MemberRunner {
            inner: Arc::clone(inner),
            gating: Gating::Full(Arc::new(request.clone())),
            event: PIPELINE_STEP_EVENT,
        });
        let report = inner
            .engine
            .run(
                runner,
                &plan.steps,
                plan.payload.clone(),
                &ctx,
                inner.fail_fast,
                PIPELINE_STEP_EVENT,
            )
            .await;

        let mut result = ExecutionResult {
            plan_id: plan.plan_id,
            skill_id: pipeline_id,
            status: ExecutionStatus::Success,
            output: Value::Null,
            reason: None,
            warnings: inner.member_warnings(&plan.steps).await?,
            steps: report.steps,
            authorization: None,
        };
        match report.output {
            Ok(output) => result.output = output,
            Err(failure) => apply_failure(&mut result, failure)?,
        }
        Ok(result)
    }

    /// Route free text and execute it. "x then y" runs as a pipeline and
    /// "x and y" as a parallel group unless `mode` says otherwise.
    pub async fn run_query(
        &self,
        tenant: &str,
        route: &RouteRequest,
        mode: Option<ExecutionMode>,
        payload: Value,
        request: &AuthorizeRequest,
    ) -> Result<QueryOutcome, OrchestratorError> {
        let mut mode = mode.unwrap_or_else(|| select_mode(&route.query));
        let mut parts = match mode {
            ExecutionMode::Single => Vec::new(),
            _ => split_query(&route.query, mode),
        };
        if parts.len() < 2 {
            mode = ExecutionMode::Single;
            parts = vec![route.query.clone()];
        }

        let decisions: Vec<RoutingDecision> = parts
            .iter()
            .map(|part| {
                let part_request = RouteRequest {
                    query: part.clone(),
                    ..route.clone()
                };
                self.route(tenant, &part_request)
            })
            .collect();

        let selected: Option<Vec<SkillId>> = decisions
            .iter()
            .map(|d| d.is_selected().then(|| d.skill_id.clone()).flatten())
            .collect();
        let Some(selected) = selected else {
            debug!(query = %route.query, "not every part was selected; nothing executed");
            return Ok(QueryOutcome {
                mode,
                decisions,
                result: None,
            });
        };

        let request = AuthorizeRequest {
            query: route.query.clone(),
            ..request.clone()
        };
        let result = match mode {
            ExecutionMode::Single => {
                let plan = self.plan(&selected[0], payload, false, &request).await?;
                self.execute(plan.plan(), &request).await?
            }
            ExecutionMode::Pipeline => {
                let steps = selected.into_iter().map(Step::Single).collect();
                self.run_pipeline(steps, payload, &request).await?
            }
            ExecutionMode::Parallel => {
                let mut seen = BTreeSet::new();
                let members = selected.into_iter().filter(|id| seen.insert(id.clone())).collect();
                self.run_pipeline(vec![Step::Parallel(members)], payload, &request)
                    .await?
            }
        };
        Ok(QueryOutcome {
            mode,
            decisions,
            result: Some(result),
        })
    }
}

fn deprecation_warning(descriptor: &SkillDescriptor) -> Option<ExecutionWarning> {
    descriptor.deprecated.then(|| ExecutionWarning {
        code: reason::DEPRECATED_SKILL.to_string(),
        skill_id: descriptor.id.clone(),
        replacement_id: descriptor.replacement_id.clone(),
        reason: descriptor.deprecation_reason.clone(),
    })
}

/// Fold a step failure into `result`, or propagate it when it is fatal.
fn apply_failure(result: &mut ExecutionResult, failure: StepFailure) -> Result<(), OrchestratorError> {
    match failure {
        StepFailure::Recursion(e) => Err(e.into()),
        StepFailure::Repository(e) => Err(e.into()),
        StepFailure::Blocked {
            policy_id,
            authorization,
            ..
        } => {
            result.status = ExecutionStatus::Blocked;
            result.reason = Some(policy_id);
            if result.authorization.is_none() {
                result.authorization = authorization.map(|a| *a);
            }
            Ok(())
        }
        other => {
            result.status = ExecutionStatus::Failed;
            result.reason = Some(other.to_string());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl<S: RecordStore> Inner<S> {
    async fn resolve(&self, skill_id: &SkillId) -> Result<Target, OrchestratorError> {
        if let Some(descriptor) = self.catalog.snapshot().get(skill_id) {
            return Ok(Target::Skill(descriptor));
        }
        match self.compositions.get(skill_id).await? {
            Some(spec) => Ok(Target::Composition(spec)),
            None => Err(SkillError::NotFound(skill_id.to_string()).into()),
        }
    }

    async fn subject(&self, target: &Target) -> Result<GateSubject, RepositoryError> {
        Ok(match target {
            Target::Skill(descriptor) => GateSubject::from_descriptor(Arc::clone(descriptor)),
            Target::Composition(spec) => {
                let snapshot = self.catalog.snapshot();
                let stored = self.compositions.all().await?;
                let tags = affected_entities(&spec.steps, &stored)
                    .iter()
                    .filter_map(|id| snapshot.get(id))
                    .flat_map(|d| d.tags.iter().cloned().collect::<Vec<_>>())
                    .collect();
                GateSubject::composite(spec.skill_id.clone(), tags, spec.risk_flagged)
            }
        })
    }

    async fn member_warnings(&self, steps: &[Step]) -> Result<Vec<ExecutionWarning>, RepositoryError> {
        let snapshot = self.catalog.snapshot();
        let stored = self.compositions.all().await?;
        Ok(affected_entities(steps, &stored)
            .iter()
            .filter_map(|id| snapshot.get(id))
            .filter_map(|d| deprecation_warning(&d))
            .collect())
    }

    /// Record the outcome of a call the circuit breaker let through.
    async fn settle_circuit(
        &self,
        skill_id: &SkillId,
        fault: Option<&ExecutionFault>,
    ) -> Result<(), RepositoryError> {
        let circuit = self.gates.circuit();
        match fault {
            None => circuit.record_success(skill_id.as_str()).await.map(|_| ()),
            Some(_) => circuit.record_failure(skill_id.as_str()).await.map(|_| ()),
        }
    }

    /// Run stored tests without gates or circuit bookkeeping. Returns the
    /// names of failing tests.
    async fn run_tests(self: &Arc<Self>, spec: &CompositionSpec) -> Result<Vec<String>, OrchestratorError> {
        let ctx = CallContext::new(self.max_depth).enter(&spec.skill_id)?;
        let mut failed = Vec::new();
        for test in &spec.tests {
            let runner = Arc::new(MemberRunner {
                inner: Arc::clone(self),
                gating: Gating::None,
                event: COMPOSITION_STEP_EVENT,
            });
            let report = self
                .engine
                .run(
                    runner,
                    &spec.steps,
                    test.payload.clone(),
                    &ctx,
                    spec.fail_fast,
                    COMPOSITION_STEP_EVENT,
                )
                .await;
            match report.output {
                Ok(output) if output == test.expected => {}
                Ok(output) => {
                    debug!(test = %test.name, ?output, expected = ?test.expected, "composition test mismatch");
                    failed.push(test.name.clone());
                }
                Err(StepFailure::Recursion(e)) => return Err(e.into()),
                Err(StepFailure::Repository(e)) => return Err(e.into()),
                Err(failure) => {
                    debug!(test = %test.name, error = %failure, "composition test failed");
                    failed.push(test.name.clone());
                }
            }
        }
        Ok(failed)
    }

    async fn run_member(
        self: Arc<Self>,
        gating: &Gating,
        event: &'static str,
        skill_id: SkillId,
        payload: Value,
        ctx: CallContext,
    ) -> Result<Value, StepFailure> {
        let ctx = ctx.enter(&skill_id).map_err(StepFailure::Recursion)?;
        let target = match self.resolve(&skill_id).await {
            Ok(target) => target,
            Err(OrchestratorError::Repository(e)) => return Err(e.into()),
            Err(_) => {
                return Err(StepFailure::Fault(ExecutionFault::Resolution {
                    entrypoint: skill_id.to_string(),
                    reason: "unknown skill".into(),
                }));
            }
        };

        if let Target::Composition(spec) = &target
            && !spec.is_active()
        {
            return Err(StepFailure::Blocked {
                skill_id,
                policy_id: reason::COMPOSITION_INACTIVE.to_string(),
                authorization: None,
            });
        }

        if ctx.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        self.admit(gating, &target, &skill_id).await?;

        // From here on the reservation made by `admit` is always settled.
        let outcome = match &target {
            Target::Skill(descriptor) => {
                let cancel = ctx.cancellation().clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(StepFailure::Cancelled),
                    outcome = self.invoker.invoke(descriptor, payload, &ctx) => {
                        outcome.map_err(StepFailure::Fault)
                    }
                }
            }
            Target::Composition(spec) => {
                let runner = Arc::new(MemberRunner {
                    inner: Arc::clone(&self),
                    gating: gating.clone(),
                    event,
                });
                self.engine
                    .run(runner, &spec.steps, payload, &ctx, spec.fail_fast, event)
                    .await
                    .output
            }
        };

        if !matches!(gating, Gating::None) {
            match &outcome {
                Ok(_) => self.settle_circuit(&skill_id, None).await?,
                Err(StepFailure::Fault(fault)) => self.settle_circuit(&skill_id, Some(fault)).await?,
                Err(_) => self.gates.circuit().release(skill_id.as_str()).await?,
            }
        }
        outcome
    }

    async fn admit(&self, gating: &Gating, target: &Target, skill_id: &SkillId) -> Result<(), StepFailure> {
        match gating {
            Gating::None => Ok(()),
            Gating::Circuit => {
                let decision = self.gates.circuit().allow(skill_id.as_str()).await?;
                if decision.allowed {
                    Ok(())
                } else {
                    Err(StepFailure::Blocked {
                        skill_id: skill_id.clone(),
                        policy_id: decision.policy_id,
                        authorization: None,
                    })
                }
            }
            Gating::Full(request) => {
                let subject = self.subject(target).await?;
                let outcome = self
                    .gates
                    .evaluate(&subject, request, GateMode::Record)
                    .await?;
                if outcome.allowed {
                    Ok(())
                } else {
                    Err(StepFailure::Blocked {
                        skill_id: skill_id.clone(),
                        policy_id: outcome
                            .blocking_policy_id()
                            .unwrap_or(reason::NOT_ROUTED)
                            .to_string(),
                        authorization: Some(Box::new(outcome)),
                    })
                }
            }
        }
    }
}

/// How members of a running composition are admitted.
#[derive(Clone)]
enum Gating {
    /// Activation tests: no gates, no circuit bookkeeping.
    None,
    /// Members of a registered composition: the composition was gated as a
    /// whole, members only pass their circuit breaker.
    Circuit,
    /// Ad-hoc pipelines: every member runs the full chain.
    Full(Arc<AuthorizeRequest>),
}

struct MemberRunner<S> {
    inner: Arc<Inner<S>>,
    gating: Gating,
    event: &'static str,
}

impl<S: RecordStore> StepRunner for MemberRunner<S> {
    fn run_member(
        self: Arc<Self>,
        skill_id: SkillId,
        payload: Value,
        ctx: CallContext,
    ) -> BoxFuture<'static, Result<Value, StepFailure>> {
        async move {
            Arc::clone(&self.inner)
                .run_member(&self.gating, self.event, skill_id, payload, ctx)
                .await
        }
        .boxed()
    }
}
