//! Role- and attribute-based access checks.
//!
//! RBAC: a role grants a permission set; every policy whose skill-id glob
//! matches contributes required permissions, all of which the role must hold.
//! ABAC: glob-keyed allow/deny rules conditioned on role, skill tags and
//! request attributes. A matching deny overrides an RBAC allow.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use skillgate_types::gate::{GateDecision, GateKind, reason};
use tracing::debug;

use super::{PolicyLoadError, matches_glob};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub skill_id: String,
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbacEffect {
    Allow,
    Deny,
}

/// Conditions of an ABAC rule. Every condition that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbacConditions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Attribute name to accepted values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbacPolicy {
    pub skill_id: String,
    pub effect: AbacEffect,
    #[serde(default)]
    pub conditions: AbacConditions,
    #[serde(default)]
    pub policy_id: Option<String>,
}

/// On-disk shape of `policies/permissions.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionConfig {
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub policies: Vec<PermissionPolicy>,
    #[serde(default)]
    pub abac_policies: Vec<AbacPolicy>,
}

/// Who is asking, and about what.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub skill_id: &'a str,
    pub role: Option<&'a str>,
    pub skill_tags: &'a BTreeSet<String>,
    pub attributes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionChecker {
    config: PermissionConfig,
}

impl PermissionChecker {
    pub fn new(config: PermissionConfig) -> Self {
        Self { config }
    }

    /// Load from a JSON file. A missing file means no restrictions.
    pub fn from_path(path: &Path) -> Result<Self, PolicyLoadError> {
        if !path.exists() {
            debug!(path = %path.display(), "no permissions file, access unrestricted");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| PolicyLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// Union of required permissions from every matching policy, sorted.
    pub fn required_permissions(&self, skill_id: &str) -> BTreeSet<String> {
        self.config
            .policies
            .iter()
            .filter(|p| matches_glob(&p.skill_id, skill_id))
            .flat_map(|p| p.required_permissions.iter().cloned())
            .collect()
    }

    /// RBAC gate.
    pub fn check_rbac(&self, request: &AccessRequest<'_>) -> GateDecision {
        let required = self.required_permissions(request.skill_id);
        if required.is_empty() {
            return GateDecision::allow(GateKind::Permission, reason::PERMISSION_NOT_REQUIRED);
        }

        let granted: BTreeSet<&str> = request
            .role
            .and_then(|role| self.config.roles.get(role))
            .map(|perms| perms.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let missing: Vec<String> = required
            .iter()
            .filter(|perm| !granted.contains(perm.as_str()))
            .cloned()
            .collect();

        if missing.is_empty() {
            GateDecision::allow(GateKind::Permission, reason::PERMISSION_GRANTED)
        } else {
            GateDecision::deny(GateKind::Permission, reason::PERMISSION_DENIED)
                .with_reason(format!("missing permissions: {}", missing.join(", ")))
                .with_missing(missing)
        }
    }

    /// ABAC gate. The first matching deny wins; otherwise the first matching
    /// allow is reported; otherwise access is not restricted.
    pub fn check_abac(&self, request: &AccessRequest<'_>) -> GateDecision {
        let matching: Vec<&AbacPolicy> = self
            .config
            .abac_policies
            .iter()
            .filter(|p| matches_glob(&p.skill_id, request.skill_id))
            .filter(|p| conditions_match(&p.conditions, request))
            .collect();

        if let Some(deny) = matching.iter().find(|p| p.effect == AbacEffect::Deny) {
            let policy_id = deny.policy_id.as_deref().unwrap_or(reason::ABAC_DENIED);
            return GateDecision::deny(GateKind::Abac, policy_id)
                .with_reason(format!("denied by attribute policy on '{}'", deny.skill_id));
        }
        if let Some(allow) = matching.first() {
            let policy_id = allow.policy_id.as_deref().unwrap_or(reason::ABAC_ALLOWED);
            return GateDecision::allow(GateKind::Abac, policy_id);
        }
        GateDecision::allow(GateKind::Abac, reason::PERMISSION_NOT_REQUIRED)
    }
}

fn conditions_match(conditions: &AbacConditions, request: &AccessRequest<'_>) -> bool {
    if !conditions.role.is_empty()
        && !request
            .role
            .is_some_and(|role| conditions.role.iter().any(|r| r == role))
    {
        return false;
    }
    if !conditions.tags.is_empty()
        && !conditions.tags.iter().any(|t| request.skill_tags.contains(t))
    {
        return false;
    }
    conditions.attributes.iter().all(|(name, accepted)| {
        request
            .attributes
            .get(name)
            .is_some_and(|value| accepted.iter().any(|a| a == value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(
        skill_id: &'a str,
        role: Option<&'a str>,
        tags: &'a BTreeSet<String>,
        attributes: &'a BTreeMap<String, String>,
    ) -> AccessRequest<'a> {
        AccessRequest {
            skill_id,
            role,
            skill_tags: tags,
            attributes,
        }
    }

    fn deny_policy(conditions: AbacConditions, policy_id: Option<&str>) -> AbacPolicy {
        AbacPolicy {
            skill_id: "finance/*".to_string(),
            effect: AbacEffect::Deny,
            conditions,
            policy_id: policy_id.map(str::to_string),
        }
    }

    #[test]
    fn test_rbac_lists_missing_permissions() {
        let checker = PermissionChecker::new(PermissionConfig {
            roles: BTreeMap::from([("analyst".into(), vec!["finance:read".into()])]),
            policies: vec![PermissionPolicy {
                skill_id: "finance/close_books".into(),
                required_permissions: vec!["finance:write".into()],
            }],
            abac_policies: vec![],
        });
        let (tags, attrs) = (BTreeSet::new(), BTreeMap::new());

        let decision =
            checker.check_rbac(&request("finance/close_books", Some("analyst"), &tags, &attrs));
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, reason::PERMISSION_DENIED);
        assert_eq!(decision.missing_permissions, vec!["finance:write"]);
    }

    #[test]
    fn test_rbac_without_role_misses_everything() {
        let checker = PermissionChecker::new(PermissionConfig {
            policies: vec![PermissionPolicy {
                skill_id: "finance/*".into(),
                required_permissions: vec!["finance:write".into(), "finance:read".into()],
            }],
            ..PermissionConfig::default()
        });
        let (tags, attrs) = (BTreeSet::new(), BTreeMap::new());
        let decision = checker.check_rbac(&request("finance/close_books", None, &tags, &attrs));
        assert_eq!(
            decision.missing_permissions,
            vec!["finance:read", "finance:write"]
        );
    }

    #[test]
    fn test_abac_denies_matching_role_with_custom_id() {
        let checker = PermissionChecker::new(PermissionConfig {
            abac_policies: vec![deny_policy(
                AbacConditions {
                    role: vec!["analyst".into()],
                    ..AbacConditions::default()
                },
                Some("finance_abac"),
            )],
            ..PermissionConfig::default()
        });
        let (tags, attrs) = (BTreeSet::new(), BTreeMap::new());
        let decision =
            checker.check_abac(&request("finance/close_books", Some("analyst"), &tags, &attrs));
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, "finance_abac");
    }

    #[test]
    fn test_abac_denies_matching_tags() {
        let checker = PermissionChecker::new(PermissionConfig {
            abac_policies: vec![deny_policy(
                AbacConditions {
                    tags: vec!["sensitive".into()],
                    ..AbacConditions::default()
                },
                None,
            )],
            ..PermissionConfig::default()
        });
        let tags = BTreeSet::from(["sensitive".to_string()]);
        let attrs = BTreeMap::new();
        let decision =
            checker.check_abac(&request("finance/close_books", Some("admin"), &tags, &attrs));
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, reason::ABAC_DENIED);
    }

    #[test]
    fn test_abac_allows_when_no_match() {
        let checker = PermissionChecker::new(PermissionConfig {
            abac_policies: vec![deny_policy(
                AbacConditions {
                    role: vec!["analyst".into()],
                    ..AbacConditions::default()
                },
                None,
            )],
            ..PermissionConfig::default()
        });
        let (tags, attrs) = (BTreeSet::new(), BTreeMap::new());
        let decision =
            checker.check_abac(&request("finance/close_books", Some("admin"), &tags, &attrs));
        assert!(decision.allowed);
        assert_eq!(decision.policy_id, reason::PERMISSION_NOT_REQUIRED);
    }

    #[test]
    fn test_abac_attribute_conditions() {
        let checker = PermissionChecker::new(PermissionConfig {
            abac_policies: vec![deny_policy(
                AbacConditions {
                    attributes: BTreeMap::from([("region".into(), vec!["eu".into()])]),
                    ..AbacConditions::default()
                },
                None,
            )],
            ..PermissionConfig::default()
        });
        let tags = BTreeSet::new();
        let eu = BTreeMap::from([("region".to_string(), "eu".to_string())]);
        let us = BTreeMap::from([("region".to_string(), "us".to_string())]);
        assert!(!checker.check_abac(&request("finance/x", None, &tags, &eu)).allowed);
        assert!(checker.check_abac(&request("finance/x", None, &tags, &us)).allowed);
    }

    #[test]
    fn test_from_path_deny_overrides_rbac_allow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        std::fs::write(
            &path,
            r#"{
                "roles": {"viewer": ["finance:write"], "admin": ["finance:write"]},
                "policies": [{"skill_id": "finance/*", "required_permissions": ["finance:write"]}],
                "abac_policies": [
                    {"skill_id": "finance/*", "effect": "deny", "conditions": {"role": ["viewer"]}}
                ]
            }"#,
        )
        .unwrap();
        let checker = PermissionChecker::from_path(&path).unwrap();
        let (tags, attrs) = (BTreeSet::new(), BTreeMap::new());

        let admin = request("finance/close_books", Some("admin"), &tags, &attrs);
        assert!(checker.check_rbac(&admin).allowed);
        assert!(checker.check_abac(&admin).allowed);

        let viewer = request("finance/close_books", Some("viewer"), &tags, &attrs);
        assert!(checker.check_rbac(&viewer).allowed);
        let denied = checker.check_abac(&viewer);
        assert!(!denied.allowed);
        assert_eq!(denied.policy_id, reason::ABAC_DENIED);
    }

    #[test]
    fn test_from_path_missing_file_is_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        let checker = PermissionChecker::from_path(&dir.path().join("absent.json")).unwrap();
        assert!(checker.config().policies.is_empty());
    }
}
