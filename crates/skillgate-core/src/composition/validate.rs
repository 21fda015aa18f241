//! Compose-time validation.
//!
//! Everything here runs before a composition is persisted: step shape,
//! self-reference, member existence and contract, and cycles that span
//! nested compositions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use skillgate_types::composition::{CompositionSpec, Step, StepInput};
use skillgate_types::skill::{RiskLevel, SkillId};

use crate::catalog::CatalogSnapshot;
use crate::error::CompositionError;

// ---------------------------------------------------------------------------
// Step shape
// ---------------------------------------------------------------------------

fn parse_member(
    target: &SkillId,
    index: usize,
    raw: &str,
) -> Result<SkillId, CompositionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CompositionError::BlankEntry { index });
    }
    let id = SkillId::parse(trimmed)?;
    if &id == target {
        return Err(CompositionError::SelfReference(target.to_string()));
    }
    Ok(id)
}

/// Turn caller-supplied steps into typed [`Step`]s.
pub fn parse_steps(target: &SkillId, inputs: &[StepInput]) -> Result<Vec<Step>, CompositionError> {
    if inputs.is_empty() {
        return Err(CompositionError::Empty);
    }

    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| match input {
            StepInput::Single(raw) => parse_member(target, index, raw).map(Step::Single),
            StepInput::Group(raws) => {
                if raws.is_empty() {
                    return Err(CompositionError::EmptyGroup { index });
                }
                let mut seen = BTreeSet::new();
                let mut members = Vec::with_capacity(raws.len());
                for raw in raws {
                    let id = parse_member(target, index, raw)?;
                    if !seen.insert(id.clone()) {
                        return Err(CompositionError::DuplicateMember {
                            index,
                            skill_id: id.to_string(),
                        });
                    }
                    members.push(id);
                }
                Ok(Step::Parallel(members))
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

/// Check every member exists and takes a single payload. Returns whether
/// the composition must be risk-flagged.
pub fn check_members(
    steps: &[Step],
    snapshot: &CatalogSnapshot,
    stored: &BTreeMap<SkillId, CompositionSpec>,
) -> Result<bool, CompositionError> {
    let mut risk_flagged = false;
    for member in steps.iter().flat_map(|s| s.members()) {
        if let Some(skill) = snapshot.get(member) {
            if !skill.contract.accepts_single_payload() {
                return Err(CompositionError::ContractMismatch {
                    skill_id: member.to_string(),
                });
            }
            risk_flagged |= skill.risk.level == RiskLevel::High || skill.risk.requires_approval;
        } else if let Some(nested) = stored.get(member) {
            risk_flagged |= nested.risk_flagged;
        } else {
            return Err(CompositionError::UnknownSkill(member.to_string()));
        }
    }
    Ok(risk_flagged)
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

fn node_for<'a>(
    graph: &mut DiGraph<&'a SkillId, ()>,
    nodes: &mut HashMap<&'a SkillId, NodeIndex>,
    id: &'a SkillId,
) -> NodeIndex {
    *nodes.entry(id).or_insert_with(|| graph.add_node(id))
}

/// Reject the candidate if, together with every stored composition, it
/// forms a cycle. The candidate's new steps replace any stored version.
pub fn detect_cycle(
    target: &SkillId,
    steps: &[Step],
    stored: &BTreeMap<SkillId, CompositionSpec>,
) -> Result<(), CompositionError> {
    let mut graph = DiGraph::<&SkillId, ()>::new();
    let mut nodes: HashMap<&SkillId, NodeIndex> = HashMap::new();

    let edges = stored
        .iter()
        .filter(|(id, _)| *id != target)
        .map(|(id, spec)| (id, spec.steps.as_slice()))
        .chain(std::iter::once((target, steps)));

    for (from, from_steps) in edges {
        let from_idx = node_for(&mut graph, &mut nodes, from);
        for member in from_steps.iter().flat_map(|s| s.members()) {
            let to_idx = node_for(&mut graph, &mut nodes, member);
            graph.add_edge(from_idx, to_idx, ());
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        CompositionError::Cycle(format!(
            "cycle detected involving '{}'",
            graph[cycle.node_id()]
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::Utc;
    use skillgate_types::composition::CompositionStatus;
    use skillgate_types::skill::{ContractParam, SkillDescriptor};

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    fn spec(raw: &str, steps: Vec<Step>) -> CompositionSpec {
        CompositionSpec {
            skill_id: id(raw),
            steps,
            version: semver::Version::new(0, 1, 0),
            status: CompositionStatus::Draft,
            risk_flagged: false,
            fail_fast: false,
            tests: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_steps_shapes() {
        let steps = parse_steps(
            &id("flow/main"),
            &["text/a".into(), vec!["text/b", "text/c"].into()],
        )
        .unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Single(id("text/a")),
                Step::Parallel(vec![id("text/b"), id("text/c")]),
            ]
        );
    }

    #[test]
    fn test_parse_steps_rejections() {
        let target = id("flow/main");
        assert!(matches!(parse_steps(&target, &[]), Err(CompositionError::Empty)));
        assert!(matches!(
            parse_steps(&target, &["  ".into()]),
            Err(CompositionError::BlankEntry { index: 0 })
        ));
        assert!(matches!(
            parse_steps(&target, &["text/a".into(), vec!["text/b", ""].into()]),
            Err(CompositionError::BlankEntry { index: 1 })
        ));
        assert!(matches!(
            parse_steps(&target, &[StepInput::Group(vec![])]),
            Err(CompositionError::EmptyGroup { index: 0 })
        ));
        assert!(matches!(
            parse_steps(&target, &["flow/main".into()]),
            Err(CompositionError::SelfReference(_))
        ));
        assert!(matches!(
            parse_steps(&target, &[vec!["text/a", "text/a"].into()]),
            Err(CompositionError::DuplicateMember { .. })
        ));
        assert!(matches!(
            parse_steps(&target, &["nonamespace".into()]),
            Err(CompositionError::InvalidId(_))
        ));
    }

    #[test]
    fn test_check_members() {
        let snapshot = testing::snapshot();
        let stored = BTreeMap::new();
        let flagged = check_members(&[Step::Single(id("text/echo"))], &snapshot, &stored).unwrap();
        assert!(!flagged);
        let flagged =
            check_members(&[Step::Single(id("admin/purge_cache"))], &snapshot, &stored).unwrap();
        assert!(flagged);
        assert!(matches!(
            check_members(&[Step::Single(id("text/missing"))], &snapshot, &stored),
            Err(CompositionError::UnknownSkill(_))
        ));
    }

    #[test]
    fn test_contract_must_accept_single_payload() {
        let mut two_args = SkillDescriptor::new(id("math/add"), "math:add");
        two_args.contract.params = vec![
            ContractParam { name: "a".into(), optional: false },
            ContractParam { name: "b".into(), optional: false },
        ];
        let snapshot = CatalogSnapshot::new([two_args]);
        let err = check_members(&[Step::Single(id("math/add"))], &snapshot, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, CompositionError::ContractMismatch { .. }));
    }

    #[test]
    fn test_nested_risk_flag_propagates() {
        let snapshot = testing::snapshot();
        let mut nested = spec("flow/inner", vec![Step::Single(id("admin/purge_cache"))]);
        nested.risk_flagged = true;
        let stored = BTreeMap::from([(id("flow/inner"), nested)]);
        assert!(check_members(&[Step::Single(id("flow/inner"))], &snapshot, &stored).unwrap());
    }

    #[test]
    fn test_detect_two_skill_cycle() {
        let stored = BTreeMap::from([(
            id("flow/b"),
            spec("flow/b", vec![Step::Single(id("flow/a"))]),
        )]);
        let err = detect_cycle(&id("flow/a"), &[Step::Single(id("flow/b"))], &stored).unwrap_err();
        assert!(matches!(err, CompositionError::Cycle(_)));
    }

    #[test]
    fn test_detect_cycle_through_parallel_group() {
        let stored = BTreeMap::from([
            (id("flow/b"), spec("flow/b", vec![Step::Single(id("flow/c"))])),
            (
                id("flow/c"),
                spec(
                    "flow/c",
                    vec![Step::Parallel(vec![id("text/echo"), id("flow/a")])],
                ),
            ),
        ]);
        assert!(detect_cycle(&id("flow/a"), &[Step::Single(id("flow/b"))], &stored).is_err());
    }

    #[test]
    fn test_recompose_replaces_old_edges() {
        // flow/a used to reference flow/b; flow/b now references flow/a.
        // Re-composing flow/a without flow/b is fine.
        let stored = BTreeMap::from([
            (id("flow/a"), spec("flow/a", vec![Step::Single(id("flow/b"))])),
            (id("flow/b"), spec("flow/b", vec![Step::Single(id("text/echo"))])),
        ]);
        detect_cycle(&id("flow/a"), &[Step::Single(id("text/echo"))], &stored).unwrap();
        detect_cycle(&id("flow/b"), &[Step::Single(id("text/upper"))], &stored).unwrap();
    }
}
