//! Heuristic risk scoring of a (request, skill) pair.

use serde::{Deserialize, Serialize};
use skillgate_types::config::{RiskConfig, RiskTrigger};
use skillgate_types::skill::{RiskLevel, SkillDescriptor};

const DEFAULT_TRIGGERS: &[(&str, f64)] = &[
    ("delete", 0.8),
    ("drop", 0.8),
    ("purge", 0.8),
    ("destroy", 0.8),
    ("wipe", 0.8),
    ("truncate", 0.8),
    ("bulk", 0.7),
    ("mass", 0.7),
    ("transfer", 0.5),
    ("payment", 0.5),
    ("refund", 0.5),
    ("update", 0.3),
    ("modify", 0.3),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    /// Matched trigger phrases, strongest first.
    pub triggers: Vec<String>,
    pub requires_approval: bool,
}

pub struct RiskScorer {
    triggers: Vec<RiskTrigger>,
    threshold: f64,
    multi_trigger_bonus: f64,
}

impl RiskScorer {
    pub fn new(config: &RiskConfig) -> Self {
        let triggers = if config.triggers.is_empty() {
            DEFAULT_TRIGGERS
                .iter()
                .map(|(phrase, weight)| RiskTrigger {
                    phrase: (*phrase).to_string(),
                    weight: *weight,
                })
                .collect()
        } else {
            config.triggers.clone()
        };
        Self {
            triggers,
            threshold: config.threshold,
            multi_trigger_bonus: config.multi_trigger_bonus,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `query` against `skill_id`. The descriptor, when known, adds
    /// its declared risk level as a floor and may force approval.
    pub fn assess(
        &self,
        query: &str,
        skill_id: &str,
        descriptor: Option<&SkillDescriptor>,
    ) -> RiskAssessment {
        let tokens = tokenize(&format!("{query} {skill_id}"));
        let joined = format!(" {} ", tokens.join(" "));

        let mut matched: Vec<&RiskTrigger> = self
            .triggers
            .iter()
            .filter(|trigger| {
                let phrase = tokenize(&trigger.phrase);
                match phrase.as_slice() {
                    [] => false,
                    [word] => tokens.iter().any(|t| t.starts_with(word.as_str())),
                    _ => joined.contains(&format!(" {} ", phrase.join(" "))),
                }
            })
            .collect();
        matched.sort_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.phrase.cmp(&b.phrase)));

        let mut score = matched.first().map(|t| t.weight).unwrap_or(0.0);
        if matched.len() >= 2 {
            score += self.multi_trigger_bonus;
        }

        let declared_approval = descriptor.is_some_and(|d| d.risk.requires_approval);
        if let Some(descriptor) = descriptor {
            score = score.max(level_floor(descriptor.risk.level));
        }
        let score = score.clamp(0.0, 1.0);

        RiskAssessment {
            score,
            triggers: matched.iter().map(|t| t.phrase.clone()).collect(),
            requires_approval: declared_approval || score >= self.threshold,
        }
    }
}

fn level_floor(level: RiskLevel) -> f64 {
    match level {
        RiskLevel::Low => 0.0,
        RiskLevel::Medium => 0.4,
        RiskLevel::High => 0.8,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
