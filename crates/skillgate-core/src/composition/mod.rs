//! Compositions: skills that are DAGs of other skills.
//!
//! [`CompositionRegistry`] validates and versions specs and persists them in
//! the `composition` namespace. [`engine::CompositionEngine`] runs them.

pub mod engine;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semver::Version;
use skillgate_types::composition::{
    CompositionSpec, CompositionStatus, CompositionTest, Step, StepInput,
};
use skillgate_types::error::RepositoryError;
use skillgate_types::skill::SkillId;
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::CatalogSnapshot;
use crate::clock::Clock;
use crate::error::CompositionError;
use crate::repository::{Namespace, RecordStore};

pub use engine::{CompositionEngine, RunReport, StepFailure, StepRunner};

pub const INITIAL_VERSION: Version = Version::new(0, 1, 0);

pub struct CompositionRegistry<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    /// Held across validation and persistence of a compose. Cycle checks
    /// read every stored spec, so composes must not interleave.
    compose_lock: Mutex<()>,
}

impl<S: RecordStore> CompositionRegistry<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            compose_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, skill_id: &SkillId) -> Result<Option<CompositionSpec>, RepositoryError> {
        self.store
            .load::<CompositionSpec>(Namespace::Composition, skill_id.as_str())
            .await
    }

    /// Every stored composition, keyed by id.
    pub async fn all(&self) -> Result<BTreeMap<SkillId, CompositionSpec>, RepositoryError> {
        let mut specs = BTreeMap::new();
        for key in self.store.keys(Namespace::Composition).await? {
            if let Some(spec) = self
                .store
                .load::<CompositionSpec>(Namespace::Composition, &key)
                .await?
            {
                specs.insert(spec.skill_id.clone(), spec);
            }
        }
        Ok(specs)
    }

    /// Validate `steps` and store them as the next version of `skill_id`.
    ///
    /// A new composition starts at 0.1.0; every re-compose bumps the patch
    /// version and drops the composition back to draft. Stored tests are
    /// kept.
    pub async fn compose(
        &self,
        skill_id: &SkillId,
        inputs: &[StepInput],
        snapshot: &CatalogSnapshot,
        fail_fast: bool,
    ) -> Result<CompositionSpec, CompositionError> {
        if snapshot.contains(skill_id) {
            return Err(CompositionError::ShadowsSkill(skill_id.to_string()));
        }
        let steps = validate::parse_steps(skill_id, inputs)?;
        let _guard = self.compose_lock.lock().await;
        let stored = self.all().await?;
        let risk_flagged = validate::check_members(&steps, snapshot, &stored)?;
        validate::detect_cycle(skill_id, &steps, &stored)?;

        let now = self.clock.now();
        let spec = self
            .store
            .update::<CompositionSpec, _, _>(Namespace::Composition, skill_id.as_str(), |slot| {
                let (version, tests) = match slot.take() {
                    Some(previous) => {
                        let mut version = previous.version;
                        version.patch += 1;
                        version.pre = semver::Prerelease::EMPTY;
                        (version, previous.tests)
                    }
                    None => (INITIAL_VERSION, Vec::new()),
                };
                let spec = CompositionSpec {
                    skill_id: skill_id.clone(),
                    steps,
                    version,
                    status: CompositionStatus::Draft,
                    risk_flagged,
                    fail_fast,
                    tests,
                    updated_at: now,
                };
                *slot = Some(spec.clone());
                spec
            })
            .await?;

        info!(
            skill_id = %spec.skill_id,
            version = %spec.version,
            steps = spec.steps.len(),
            risk_flagged = spec.risk_flagged,
            "composition saved"
        );
        Ok(spec)
    }

    /// Add or replace (by name) a stored test case.
    pub async fn add_test(
        &self,
        skill_id: &SkillId,
        test: CompositionTest,
    ) -> Result<CompositionSpec, CompositionError> {
        let now = self.clock.now();
        self.modify(skill_id, |spec| {
            spec.tests.retain(|t| t.name != test.name);
            spec.tests.push(test);
            spec.updated_at = now;
        })
        .await
    }

    pub async fn set_status(
        &self,
        skill_id: &SkillId,
        status: CompositionStatus,
    ) -> Result<CompositionSpec, CompositionError> {
        let now = self.clock.now();
        self.modify(skill_id, |spec| {
            spec.status = status;
            spec.updated_at = now;
        })
        .await
    }

    async fn modify<F>(&self, skill_id: &SkillId, f: F) -> Result<CompositionSpec, CompositionError>
    where
        F: FnOnce(&mut CompositionSpec) + Send,
    {
        self.store
            .update::<CompositionSpec, _, _>(Namespace::Composition, skill_id.as_str(), |slot| {
                slot.as_mut().map(|spec| {
                    f(spec);
                    spec.clone()
                })
            })
            .await?
            .ok_or_else(|| CompositionError::NotFound(skill_id.to_string()))
    }
}

/// Leaf skills `steps` would invoke, nested compositions expanded, in
/// first-execution order without duplicates.
pub fn affected_entities(
    steps: &[Step],
    stored: &BTreeMap<SkillId, CompositionSpec>,
) -> Vec<SkillId> {
    fn walk(
        steps: &[Step],
        stored: &BTreeMap<SkillId, CompositionSpec>,
        visiting: &mut BTreeSet<SkillId>,
        seen: &mut BTreeSet<SkillId>,
        out: &mut Vec<SkillId>,
    ) {
        for member in steps.iter().flat_map(|s| s.members()) {
            match stored.get(member) {
                Some(nested) => {
                    if visiting.insert(member.clone()) {
                        walk(&nested.steps, stored, visiting, seen, out);
                        visiting.remove(member);
                    }
                }
                None => {
                    if seen.insert(member.clone()) {
                        out.push(member.clone());
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(steps, stored, &mut BTreeSet::new(), &mut BTreeSet::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::InMemoryRecordStore;
    use crate::testing;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    fn registry() -> CompositionRegistry<InMemoryRecordStore> {
        CompositionRegistry::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            )),
        )
    }

    #[tokio::test]
    async fn test_compose_versions_and_resets_status() {
        let registry = registry();
        let snapshot = testing::snapshot();
        let target = id("flow/shout");

        let first = registry
            .compose(&target, &["text/echo".into(), "text/upper".into()], &snapshot, false)
            .await
            .unwrap();
        assert_eq!(first.version, Version::new(0, 1, 0));
        assert_eq!(first.status, CompositionStatus::Draft);

        registry.set_status(&target, CompositionStatus::Active).await.unwrap();
        registry
            .add_test(
                &target,
                CompositionTest {
                    name: "basic".into(),
                    payload: json!("hi"),
                    expected: json!("HI"),
                },
            )
            .await
            .unwrap();

        let second = registry
            .compose(&target, &["text/upper".into()], &snapshot, false)
            .await
            .unwrap();
        assert_eq!(second.version, Version::new(0, 1, 1));
        assert_eq!(second.status, CompositionStatus::Draft);
        assert_eq!(second.tests.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_persistence() {
        let registry = registry();
        let snapshot = testing::snapshot();
        registry
            .compose(&id("flow/a"), &["text/echo".into()], &snapshot, false)
            .await
            .unwrap();
        registry
            .compose(&id("flow/b"), &["flow/a".into()], &snapshot, false)
            .await
            .unwrap();

        let err = registry
            .compose(&id("flow/a"), &["flow/b".into()], &snapshot, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositionError::Cycle(_)));

        let stored = registry.get(&id("flow/a")).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(0, 1, 0));
        assert_eq!(stored.steps, vec![Step::Single(id("text/echo"))]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_composes_cannot_persist_cycle() {
        let snapshot = Arc::new(testing::snapshot());
        for _ in 0..25 {
            let registry = Arc::new(registry());
            for flow in ["flow/a", "flow/b"] {
                registry
                    .compose(&id(flow), &["text/echo".into()], &snapshot, false)
                    .await
                    .unwrap();
            }

            let spawn = |target: &'static str, member: &'static str| {
                let registry = Arc::clone(&registry);
                let snapshot = Arc::clone(&snapshot);
                tokio::spawn(async move {
                    registry
                        .compose(&id(target), &[member.into()], &snapshot, false)
                        .await
                })
            };
            let (a, b) = tokio::join!(spawn("flow/a", "flow/b"), spawn("flow/b", "flow/a"));
            let outcomes = [a.unwrap(), b.unwrap()];

            let rejected = outcomes
                .iter()
                .filter(|o| matches!(o, Err(CompositionError::Cycle(_))))
                .count();
            assert_eq!(rejected, 1);
            assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);

            let stored = registry.all().await.unwrap();
            let pointing_at_flows = stored
                .values()
                .filter(|spec| {
                    spec.steps
                        .iter()
                        .flat_map(|s| s.members())
                        .any(|m| stored.contains_key(m))
                })
                .count();
            assert_eq!(pointing_at_flows, 1);
        }
    }

    #[tokio::test]
    async fn test_self_reference_never_persists() {
        let registry = registry();
        let err = registry
            .compose(&id("flow/a"), &["flow/a".into()], &testing::snapshot(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositionError::SelfReference(_)));
        assert!(registry.get(&id("flow/a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cannot_shadow_catalog_skill() {
        let registry = registry();
        let err = registry
            .compose(&id("text/echo"), &["text/upper".into()], &testing::snapshot(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositionError::ShadowsSkill(_)));
    }

    #[tokio::test]
    async fn test_missing_composition_not_found() {
        let registry = registry();
        let err = registry
            .set_status(&id("flow/none"), CompositionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositionError::NotFound(_)));
    }

    #[test]
    fn test_affected_entities_expands_nested() {
        let inner = CompositionSpec {
            skill_id: id("flow/inner"),
            steps: vec![Step::Parallel(vec![id("text/upper"), id("text/echo")])],
            version: INITIAL_VERSION,
            status: CompositionStatus::Active,
            risk_flagged: false,
            fail_fast: false,
            tests: Vec::new(),
            updated_at: Utc::now(),
        };
        let stored = BTreeMap::from([(id("flow/inner"), inner)]);
        let steps = vec![
            Step::Single(id("text/echo")),
            Step::Single(id("flow/inner")),
            Step::Single(id("text/reverse")),
        ];
        assert_eq!(
            affected_entities(&steps, &stored),
            vec![id("text/echo"), id("text/upper"), id("text/reverse")]
        );
    }
}
