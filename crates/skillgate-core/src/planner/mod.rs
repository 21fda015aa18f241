//! Execution planning.
//!
//! `plan_id` is a pure function of the skill id, the normalized payload and
//! the composition shape. A dry-run preview and the approved run that
//! follows it therefore share one id.

pub mod hash;

use std::sync::Arc;

use serde_json::Value;
use skillgate_types::composition::Step;
use skillgate_types::gate::AuthorizationOutcome;
use skillgate_types::plan::{ExecutionPlan, Preview};
use skillgate_types::skill::SkillId;

use crate::clock::Clock;

pub use hash::{PlanHasher, normalize};

pub const PLAN_ID_PREFIX: &str = "plan-";

pub struct Planner {
    hasher: Arc<dyn PlanHasher>,
    clock: Arc<dyn Clock>,
}

impl Planner {
    pub fn new(hasher: Arc<dyn PlanHasher>, clock: Arc<dyn Clock>) -> Self {
        Self { hasher, clock }
    }

    pub fn plan_id(&self, skill_id: &SkillId, payload: &Value, steps: &[Step]) -> String {
        let canonical = serde_json::json!({
            "skill_id": skill_id,
            "payload": normalize(payload),
            "steps": steps,
        });
        format!("{PLAN_ID_PREFIX}{}", self.hasher.digest(&canonical.to_string()))
    }

    pub fn build(&self, skill_id: SkillId, payload: Value, steps: Vec<Step>) -> ExecutionPlan {
        let plan_id = self.plan_id(&skill_id, &payload, &steps);
        ExecutionPlan {
            plan_id,
            skill_id,
            payload: normalize(&payload),
            steps,
            created_at: self.clock.now(),
        }
    }

    pub fn preview(
        &self,
        plan: ExecutionPlan,
        affected_entities: Vec<SkillId>,
        authorization: AuthorizationOutcome,
    ) -> Preview {
        Preview {
            plan_id: plan.plan_id.clone(),
            skill_id: plan.skill_id.clone(),
            affected_entities,
            authorization,
            plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FnvHasher;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn planner() -> (Arc<ManualClock>, Planner) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        (clock.clone(), Planner::new(Arc::new(FnvHasher), clock))
    }

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    #[test]
    fn test_plan_id_stable_across_time_and_key_order() {
        let (clock, planner) = planner();
        let first = planner.build(id("text/echo"), json!({"a": 1, "b": 2}), vec![]);
        clock.advance(Duration::hours(3));
        let second = planner.build(id("text/echo"), json!({"b": 2, "a": 1}), vec![]);
        assert_eq!(first.plan_id, second.plan_id);
        assert!(first.plan_id.starts_with(PLAN_ID_PREFIX));
        assert_ne!(first.created_at, second.created_at);
    }

    #[test]
    fn test_plan_id_depends_on_inputs() {
        let (_, planner) = planner();
        let base = planner.plan_id(&id("text/echo"), &json!("hi"), &[]);
        assert_ne!(base, planner.plan_id(&id("text/upper"), &json!("hi"), &[]));
        assert_ne!(base, planner.plan_id(&id("text/echo"), &json!("ho"), &[]));
        let steps = vec![Step::Single(id("text/upper"))];
        assert_ne!(base, planner.plan_id(&id("text/echo"), &json!("hi"), &steps));
    }
}
