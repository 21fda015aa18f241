//! Routing decision types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::skill::SkillId;

/// Outcome class of a routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Selected,
    LowConfidence,
    NoSkillFound,
    Ambiguous,
}

impl RoutingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::LowConfidence => "low_confidence",
            Self::NoSkillFound => "no_skill_found",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for RoutingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring mode hint. Shifts the relative weight of the keyword and
/// semantic signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl std::str::FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

/// How a multi-part query is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Single,
    Pipeline,
    Parallel,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "pipeline" => Ok(Self::Pipeline),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// One scored catalog entry. Created per routing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingCandidate {
    pub skill_id: SkillId,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub combined_score: f64,
    pub confidence: f64,
    /// Recorded negative-feedback events, used as the first tie-breaker.
    pub negative_feedback: u32,
}

/// Result of routing a query against a catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub status: RoutingStatus,
    pub skill_id: Option<SkillId>,
    pub confidence: f64,
    /// All eligible candidates, best first.
    pub candidates: Vec<RoutingCandidate>,
    /// Candidate ids after the chosen one, in rank order.
    pub alternatives: Vec<SkillId>,
}

impl RoutingDecision {
    pub fn no_skill_found() -> Self {
        Self {
            status: RoutingStatus::NoSkillFound,
            skill_id: None,
            confidence: 0.0,
            candidates: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    pub fn is_selected(&self) -> bool {
        self.status == RoutingStatus::Selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RoutingStatus::NoSkillFound).unwrap();
        assert_eq!(json, "\"no_skill_found\"");
        assert_eq!(RoutingStatus::LowConfidence.to_string(), "low_confidence");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Keyword".parse::<RoutingMode>().unwrap(), RoutingMode::Keyword);
        assert!("fuzzy".parse::<RoutingMode>().is_err());
        assert_eq!(
            "pipeline".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Pipeline
        );
    }
}
