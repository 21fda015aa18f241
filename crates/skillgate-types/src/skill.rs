//! Skill descriptor types.
//!
//! A [`SkillDescriptor`] is the catalog's view of one registered capability:
//! its namespaced id, version, tags, risk hints, deprecation state and the
//! contract describing how its entrypoint is called.

use std::collections::BTreeSet;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::SkillError;

// ---------------------------------------------------------------------------
// Skill identifiers
// ---------------------------------------------------------------------------

/// Namespaced skill identifier of the form `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SkillId(String);

impl SkillId {
    /// Parse and validate a skill id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, SkillError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        let valid = trimmed.len() >= 3
            && !trimmed.starts_with('/')
            && !trimmed.ends_with('/')
            && trimmed.contains('/')
            && !trimmed.chars().any(char::is_whitespace);
        if !valid {
            return Err(SkillError::InvalidId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `/`.
    pub fn namespace(&self) -> &str {
        self.0.split_once('/').map(|(ns, _)| ns).unwrap_or(&self.0)
    }

    /// The part after the first `/`.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for SkillId {
    type Error = SkillError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SkillId> for String {
    fn from(id: SkillId) -> Self {
        id.0
    }
}

impl AsRef<str> for SkillId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Risk hints
// ---------------------------------------------------------------------------

/// Coarse risk level declared by the skill author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Author-declared risk metadata. Feeds the risk scorer's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskHints {
    #[serde(default)]
    pub level: RiskLevel,
    #[serde(default)]
    pub requires_approval: bool,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One declared parameter of a skill's entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParam {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

/// How a skill's entrypoint is called.
///
/// `entrypoint` has the form `module:function` and is resolved through the
/// capability registry at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillContract {
    pub entrypoint: String,
    #[serde(default = "default_params")]
    pub params: Vec<ContractParam>,
}

fn default_params() -> Vec<ContractParam> {
    vec![ContractParam {
        name: "payload".to_string(),
        optional: true,
    }]
}

impl SkillContract {
    pub fn new(entrypoint: impl Into<String>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            params: default_params(),
        }
    }

    /// True when the entrypoint can be called with exactly one payload
    /// argument: at most one required parameter.
    pub fn accepts_single_payload(&self) -> bool {
        self.params.iter().filter(|p| !p.optional).count() <= 1
    }

    /// Split `module:function`. `None` when malformed.
    pub fn split_entrypoint(&self) -> Option<(&str, &str)> {
        let (module, function) = self.entrypoint.split_once(':')?;
        if module.trim().is_empty() || function.trim().is_empty() || function.contains(':') {
            return None;
        }
        Some((module, function))
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A registered skill as published by the catalog.
///
/// Descriptors are immutable within one catalog snapshot. Other components
/// hold them behind the snapshot's `Arc` and never own them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub id: SkillId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: Version,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub risk: RiskHints,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_id: Option<SkillId>,
    #[serde(flatten)]
    pub contract: SkillContract,
}

impl SkillDescriptor {
    /// Minimal descriptor with version 0.1.0 and a single-payload contract.
    pub fn new(id: SkillId, entrypoint: impl Into<String>) -> Self {
        let name = id.name().to_string();
        Self {
            id,
            name,
            description: String::new(),
            version: Version::new(0, 1, 0),
            tags: BTreeSet::new(),
            risk: RiskHints::default(),
            deprecated: false,
            deprecation_reason: None,
            replacement_id: None,
            contract: SkillContract::new(entrypoint),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_risk(mut self, level: RiskLevel, requires_approval: bool) -> Self {
        self.risk = RiskHints {
            level,
            requires_approval,
        };
        self
    }

    pub fn deprecate(mut self, reason: Option<&str>, replacement: Option<SkillId>) -> Self {
        self.deprecated = true;
        self.deprecation_reason = reason.map(str::to_string);
        self.replacement_id = replacement;
        self
    }

    /// Check the descriptor's structural rules: entrypoint form and
    /// deprecation metadata. The id and version are validated by their types.
    pub fn validate(&self) -> Result<(), SkillError> {
        if self.contract.split_entrypoint().is_none() {
            return Err(SkillError::InvalidEntrypoint {
                skill_id: self.id.to_string(),
                entrypoint: self.contract.entrypoint.clone(),
            });
        }
        if self.deprecated {
            let has_reason = self
                .deprecation_reason
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if !has_reason && self.replacement_id.is_none() {
                return Err(SkillError::DeprecationMetadata(self.id.to_string()));
            }
        }
        Ok(())
    }

    /// Name used for display: explicit name or the id's name part.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.name()
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    #[test]
    fn test_skill_id_requires_namespace() {
        assert!(SkillId::parse("billing/refund").is_ok());
        assert!(SkillId::parse("refund").is_err());
        assert!(SkillId::parse("/refund").is_err());
        assert!(SkillId::parse("billing/").is_err());
        assert!(SkillId::parse("a b/c").is_err());
    }

    #[test]
    fn test_skill_id_parts() {
        let id = id("billing/refund");
        assert_eq!(id.namespace(), "billing");
        assert_eq!(id.name(), "refund");
    }

    #[test]
    fn test_skill_id_deserialize_rejects_invalid() {
        let ok: Result<SkillId, _> = serde_json::from_str("\"text/echo\"");
        assert!(ok.is_ok());
        let bad: Result<SkillId, _> = serde_json::from_str("\"echo\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_contract_single_payload() {
        let mut contract = SkillContract::new("mod:run");
        assert!(contract.accepts_single_payload());

        contract.params = vec![
            ContractParam {
                name: "payload".into(),
                optional: false,
            },
            ContractParam {
                name: "extra".into(),
                optional: false,
            },
        ];
        assert!(!contract.accepts_single_payload());

        contract.params[1].optional = true;
        assert!(contract.accepts_single_payload());
    }

    #[test]
    fn test_validate_entrypoint_form() {
        let desc = SkillDescriptor::new(id("text/echo"), "builtin:echo");
        assert!(desc.validate().is_ok());

        let bad = SkillDescriptor::new(id("text/echo"), "builtin_echo");
        assert!(matches!(
            bad.validate(),
            Err(SkillError::InvalidEntrypoint { .. })
        ));
    }

    #[test]
    fn test_validate_deprecation_needs_reason_or_replacement() {
        let bare = SkillDescriptor::new(id("text/old"), "builtin:echo").deprecate(None, None);
        assert!(matches!(
            bare.validate(),
            Err(SkillError::DeprecationMetadata(_))
        ));

        let with_reason =
            SkillDescriptor::new(id("text/old"), "builtin:echo").deprecate(Some("superseded"), None);
        assert!(with_reason.validate().is_ok());

        let with_replacement = SkillDescriptor::new(id("text/old"), "builtin:echo")
            .deprecate(None, Some(id("text/new")));
        assert!(with_replacement.validate().is_ok());
    }

    #[test]
    fn test_descriptor_yaml_roundtrip_fields() {
        let yaml = r#"
id: billing/refund
name: Refund
description: Issue a refund for an invoice
version: 1.2.0
tags: [billing, payments]
risk:
  level: high
  requires_approval: true
entrypoint: billing:refund
"#;
        let desc: SkillDescriptor = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(desc.id.as_str(), "billing/refund");
        assert_eq!(desc.version, Version::new(1, 2, 0));
        assert!(desc.tags.contains("payments"));
        assert_eq!(desc.risk.level, RiskLevel::High);
        assert!(desc.risk.requires_approval);
        assert_eq!(desc.contract.entrypoint, "billing:refund");
        assert!(desc.contract.accepts_single_payload());
    }

    #[test]
    fn test_descriptor_yaml_rejects_bad_version() {
        let yaml = "id: a/b\nversion: one\nentrypoint: m:f\n";
        let parsed: Result<SkillDescriptor, _> = serde_yaml_ng::from_str(yaml);
        assert!(parsed.is_err());
    }
}
