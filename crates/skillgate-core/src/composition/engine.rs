//! Composition execution.
//!
//! Sequential steps feed their output forward. A parallel group spawns every
//! member on a `JoinSet` bounded by a semaphore, joins all of them, and
//! reassembles outputs and step records by declaration index, never by
//! completion order. Order indices are contiguous across the whole run.
//!
//! Fail-fast cancels the group's scope. Members still waiting for a permit
//! are dropped; members already running see the cancelled context and are
//! left to return on their own so their gate reservations get settled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde_json::Value;
use skillgate_types::composition::Step;
use skillgate_types::error::RepositoryError;
use skillgate_types::gate::AuthorizationOutcome;
use skillgate_types::plan::{StepRecord, StepStatus};
use skillgate_types::skill::SkillId;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::RecursionError;
use crate::runtime::{CallContext, ExecutionFault};

// ---------------------------------------------------------------------------
// Member execution seam
// ---------------------------------------------------------------------------

/// Why a member did not produce output.
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Fault(#[from] ExecutionFault),

    #[error("'{skill_id}' blocked: {policy_id}")]
    Blocked {
        skill_id: SkillId,
        policy_id: String,
        authorization: Option<Box<AuthorizationOutcome>>,
    },

    #[error(transparent)]
    Recursion(#[from] RecursionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("cancelled after a sibling failed")]
    Cancelled,
}

impl StepFailure {
    pub fn status(&self) -> StepStatus {
        match self {
            Self::Blocked { .. } => StepStatus::Blocked,
            Self::Cancelled => StepStatus::Cancelled,
            Self::Fault(_) | Self::Recursion(_) | Self::Repository(_) => StepStatus::Failed,
        }
    }

    /// Lower ranks win when a group fails several ways at once. Recursion
    /// and repository errors abort the request, so they are never masked.
    fn rank(&self) -> u8 {
        match self {
            Self::Recursion(_) => 0,
            Self::Repository(_) => 1,
            Self::Fault(_) | Self::Blocked { .. } => 2,
            Self::Cancelled => 3,
        }
    }
}

/// Runs a single member skill. Implemented by the orchestrator, which
/// decides how members are gated and whether they are nested compositions.
pub trait StepRunner: Send + Sync + 'static {
    fn run_member(
        self: Arc<Self>,
        skill_id: SkillId,
        payload: Value,
        ctx: CallContext,
    ) -> BoxFuture<'static, Result<Value, StepFailure>>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Output (or first failure) of a run plus every step record emitted.
#[derive(Debug)]
pub struct RunReport {
    pub output: Result<Value, StepFailure>,
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone)]
pub struct CompositionEngine {
    parallel_limit: usize,
}

impl CompositionEngine {
    pub fn new(parallel_limit: usize) -> Self {
        Self {
            parallel_limit: parallel_limit.max(1),
        }
    }

    pub fn parallel_limit(&self) -> usize {
        self.parallel_limit
    }

    /// Execute `steps` against `payload`. Stops at the first failing step;
    /// later steps emit no records.
    pub async fn run<R: StepRunner>(
        &self,
        runner: Arc<R>,
        steps: &[Step],
        payload: Value,
        ctx: &CallContext,
        fail_fast: bool,
        event: &'static str,
    ) -> RunReport {
        let mut records = Vec::new();
        let mut current = payload;

        for step in steps {
            if ctx.is_cancelled() {
                return RunReport {
                    output: Err(StepFailure::Cancelled),
                    steps: records,
                };
            }
            let outcome = match step {
                Step::Single(member) => {
                    let started = Instant::now();
                    let outcome = Arc::clone(&runner)
                        .run_member(member.clone(), current, ctx.clone())
                        .await;
                    records.push(emit(event, records.len(), member, started.elapsed(), &outcome));
                    outcome
                }
                Step::Parallel(members) => {
                    self.run_group(&runner, members, current, ctx, fail_fast, event, &mut records)
                        .await
                }
            };
            match outcome {
                Ok(output) => current = output,
                Err(failure) => {
                    return RunReport {
                        output: Err(failure),
                        steps: records,
                    };
                }
            }
        }

        RunReport {
            output: Ok(current),
            steps: records,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_group<R: StepRunner>(
        &self,
        runner: &Arc<R>,
        members: &[SkillId],
        input: Value,
        ctx: &CallContext,
        fail_fast: bool,
        event: &'static str,
        records: &mut Vec<StepRecord>,
    ) -> Result<Value, StepFailure> {
        let semaphore = Arc::new(Semaphore::new(self.parallel_limit));
        let scope = ctx.child_scope();
        let mut set = JoinSet::new();

        for (index, member) in members.iter().enumerate() {
            let runner = Arc::clone(runner);
            let semaphore = Arc::clone(&semaphore);
            let member = member.clone();
            let input = input.clone();
            let ctx = scope.clone();
            set.spawn(async move {
                let started = Instant::now();
                let outcome: Result<Value, StepFailure> = async {
                    let token = ctx.cancellation().clone();
                    let _permit = tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(StepFailure::Cancelled),
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return Err(StepFailure::Cancelled),
                        },
                    };
                    if token.is_cancelled() {
                        return Err(StepFailure::Cancelled);
                    }
                    // Started members run to completion.
                    runner.run_member(member, input, ctx).await
                }
                .await;
                (index, outcome, started.elapsed())
            });
        }

        let mut slots: Vec<Option<(Result<Value, StepFailure>, Duration)>> =
            members.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome, elapsed)) => {
                    if fail_fast && outcome.is_err() && !scope.is_cancelled() {
                        scope.cancellation().cancel();
                    }
                    slots[index] = Some((outcome, elapsed));
                }
                Err(e) => warn!(error = %e, "parallel member task did not complete"),
            }
        }

        let mut outputs = Vec::with_capacity(members.len());
        let mut failures = Vec::new();
        for (member, slot) in members.iter().zip(slots) {
            let (outcome, elapsed) = slot.unwrap_or_else(|| {
                (
                    Err(StepFailure::Fault(ExecutionFault::Panicked {
                        skill_id: member.to_string(),
                    })),
                    Duration::ZERO,
                )
            });
            records.push(emit(event, records.len(), member, elapsed, &outcome));
            match outcome {
                Ok(output) => outputs.push(output),
                Err(failure) => failures.push(failure),
            }
        }

        // Most severe failure wins; ties go to declaration order.
        let reported = failures
            .into_iter()
            .enumerate()
            .min_by_key(|(index, failure)| (failure.rank(), *index))
            .map(|(_, failure)| failure);
        match reported {
            Some(failure) => Err(failure),
            None => Ok(Value::Array(outputs)),
        }
    }
}

fn emit(
    event: &'static str,
    order: usize,
    member: &SkillId,
    elapsed: Duration,
    outcome: &Result<Value, StepFailure>,
) -> StepRecord {
    let record = StepRecord {
        order,
        step_id: member.clone(),
        duration_ms: elapsed.as_millis() as u64,
        status: match outcome {
            Ok(_) => StepStatus::Success,
            Err(failure) => failure.status(),
        },
        error: outcome.as_ref().err().map(ToString::to_string),
    };
    info!(
        event,
        order = record.order,
        step_id = %record.step_id,
        duration_ms = record.duration_ms,
        status = record.status.as_str(),
        "step finished"
    );
    record
}
