//! Skill router: candidate scoring, deterministic ranking and decision.
//!
//! Routing is a pure function of the catalog snapshot, the request and the
//! feedback state. Identical inputs always give the same ranked order: ties
//! on combined score fall back to fewer negative-feedback events, then to
//! lexicographic skill id.

pub mod cache;
pub mod mode;
pub mod scoring;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use skillgate_types::config::RouterConfig;
use skillgate_types::routing::{RoutingCandidate, RoutingDecision, RoutingMode, RoutingStatus};
use skillgate_types::skill::{SkillDescriptor, SkillId};
use tracing::debug;

use crate::catalog::CatalogSnapshot;
use crate::feedback::ConfidenceProvider;

pub use cache::RoutingCache;

/// One routing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequest {
    /// Free text, or an explicit skill id.
    pub query: String,
    /// Only skills sharing at least one of these tags are eligible.
    pub tags: BTreeSet<String>,
    pub mode: Option<RoutingMode>,
    pub include_deprecated: bool,
}

impl RouteRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn include_deprecated(mut self, include: bool) -> Self {
        self.include_deprecated = include;
        self
    }
}

pub struct SkillRouter {
    config: RouterConfig,
}

impl SkillRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn weights(&self, mode: RoutingMode) -> (f64, f64) {
        match mode {
            RoutingMode::Keyword => (1.0, 0.0),
            RoutingMode::Semantic => (0.0, 1.0),
            RoutingMode::Hybrid => (self.config.keyword_weight, self.config.semantic_weight),
        }
    }

    fn eligible(&self, skill: &SkillDescriptor, request: &RouteRequest) -> bool {
        if skill.deprecated && !request.include_deprecated {
            return false;
        }
        request.tags.is_empty() || request.tags.iter().any(|t| skill.tags.contains(t))
    }

    /// Score every eligible skill and return them best first.
    pub fn rank(
        &self,
        snapshot: &CatalogSnapshot,
        request: &RouteRequest,
        feedback: &dyn ConfidenceProvider,
    ) -> Vec<RoutingCandidate> {
        let (wk, ws) = self.weights(request.mode.unwrap_or_default());
        let query_terms = scoring::terms(&request.query);

        let mut candidates: Vec<RoutingCandidate> = snapshot
            .list()
            .filter(|skill| self.eligible(skill, request))
            .filter_map(|skill| {
                let keyword_score =
                    scoring::keyword_score(&query_terms, &scoring::skill_terms(skill));
                let semantic_score = scoring::semantic_score(&request.query, skill);
                let confidence = feedback.confidence(&skill.id);
                let combined_score = (wk * keyword_score + ws * semantic_score) * confidence;
                (combined_score > 0.0).then(|| RoutingCandidate {
                    skill_id: skill.id.clone(),
                    keyword_score,
                    semantic_score,
                    combined_score,
                    confidence,
                    negative_feedback: feedback.negative_count(&skill.id),
                })
            })
            .collect();

        candidates.sort_by(rank_order);
        candidates
    }

    pub fn route(
        &self,
        snapshot: &CatalogSnapshot,
        request: &RouteRequest,
        feedback: &dyn ConfidenceProvider,
    ) -> RoutingDecision {
        if let Some(explicit) = self.explicit(snapshot, request) {
            return explicit;
        }

        let candidates = self.rank(snapshot, request, feedback);
        let Some(top) = candidates.first() else {
            debug!(query = %request.query, "no eligible skill");
            return RoutingDecision::no_skill_found();
        };

        let status = if top.combined_score < self.config.min_confidence {
            RoutingStatus::LowConfidence
        } else if self.config.ambiguity_margin > 0.0
            && candidates.get(1).is_some_and(|runner_up| {
                top.combined_score - runner_up.combined_score < self.config.ambiguity_margin
            })
        {
            RoutingStatus::Ambiguous
        } else {
            RoutingStatus::Selected
        };

        let decision = RoutingDecision {
            status,
            skill_id: Some(top.skill_id.clone()),
            confidence: top.combined_score,
            alternatives: candidates
                .iter()
                .skip(1)
                .map(|c| c.skill_id.clone())
                .collect(),
            candidates,
        };
        debug!(
            query = %request.query,
            status = %decision.status,
            skill_id = ?decision.skill_id.as_ref().map(SkillId::as_str),
            confidence = decision.confidence,
            "routing decision"
        );
        decision
    }

    /// A query that is exactly a known skill id selects it outright.
    fn explicit(&self, snapshot: &CatalogSnapshot, request: &RouteRequest) -> Option<RoutingDecision> {
        let skill = snapshot.get_str(request.query.trim())?;
        Some(RoutingDecision {
            status: RoutingStatus::Selected,
            skill_id: Some(skill.id.clone()),
            confidence: 1.0,
            candidates: vec![RoutingCandidate {
                skill_id: skill.id.clone(),
                keyword_score: 1.0,
                semantic_score: 1.0,
                combined_score: 1.0,
                confidence: 1.0,
                negative_feedback: 0,
            }],
            alternatives: Vec::new(),
        })
    }
}

/// Combined score descending, then fewer negatives, then skill id.
fn rank_order(a: &RoutingCandidate, b: &RoutingCandidate) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| a.negative_feedback.cmp(&b.negative_feedback))
        .then_with(|| a.skill_id.cmp(&b.skill_id))
}
