//! Approval gate.
//!
//! When a shared approval token is configured, any presented token must
//! match it, whether or not approval is required and whatever status the
//! caller claims. An approved status without the token does not count.

use skillgate_types::gate::{ApprovalStatus, GateDecision, GateKind, reason};
use subtle::ConstantTimeEq;

use super::engine::ApprovalRequirement;

#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    token: Option<String>,
}

impl ApprovalGate {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn token_matches(&self, provided: &str) -> bool {
        self.token
            .as_deref()
            .is_some_and(|expected| expected.as_bytes().ct_eq(provided.as_bytes()).into())
    }

    pub fn evaluate(
        &self,
        requirement: &ApprovalRequirement,
        status: Option<ApprovalStatus>,
        provided_token: Option<&str>,
    ) -> GateDecision {
        if self.token.is_some()
            && let Some(provided) = provided_token
            && !self.token_matches(provided)
        {
            return GateDecision::deny(GateKind::Approval, reason::APPROVAL_TOKEN_INVALID)
                .with_reason("approval token does not match");
        }

        if !requirement.required {
            return GateDecision::allow(GateKind::Approval, reason::APPROVAL_NOT_REQUIRED);
        }

        let detail = serde_json::json!({ "requirement_policy_id": requirement.policy_id });
        match status.unwrap_or_default() {
            ApprovalStatus::Denied => {
                GateDecision::deny(GateKind::Approval, reason::APPROVAL_DENIED).with_detail(detail)
            }
            ApprovalStatus::Pending => GateDecision::deny(GateKind::Approval, reason::APPROVAL_REQUIRED)
                .with_reason(format!("approval required by {}", requirement.policy_id))
                .with_detail(detail),
            ApprovalStatus::Approved if self.token.is_some() && provided_token.is_none() => {
                GateDecision::deny(GateKind::Approval, reason::APPROVAL_TOKEN_INVALID)
                    .with_reason("approval token missing")
                    .with_detail(detail)
            }
            ApprovalStatus::Approved => {
                GateDecision::allow(GateKind::Approval, reason::APPROVAL_GRANTED).with_detail(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> ApprovalRequirement {
        ApprovalRequirement {
            required: true,
            policy_id: reason::POLICY_DEFAULT.into(),
            overridden: false,
        }
    }

    fn not_required() -> ApprovalRequirement {
        ApprovalRequirement {
            required: false,
            ..required()
        }
    }

    #[test]
    fn test_missing_approval_blocks() {
        let gate = ApprovalGate::new(None);
        let d = gate.evaluate(&required(), None, None);
        assert!(!d.allowed);
        assert_eq!(d.policy_id, reason::APPROVAL_REQUIRED);
    }

    #[test]
    fn test_denied_blocks() {
        let gate = ApprovalGate::new(None);
        let d = gate.evaluate(&required(), Some(ApprovalStatus::Denied), None);
        assert_eq!(d.policy_id, reason::APPROVAL_DENIED);
    }

    #[test]
    fn test_approved_without_configured_token() {
        let gate = ApprovalGate::new(None);
        let d = gate.evaluate(&required(), Some(ApprovalStatus::Approved), None);
        assert!(d.allowed);
        assert_eq!(d.policy_id, reason::APPROVAL_GRANTED);
    }

    #[test]
    fn test_wrong_token_blocks_even_when_approved() {
        let gate = ApprovalGate::new(Some("s3cret".into()));
        let d = gate.evaluate(&required(), Some(ApprovalStatus::Approved), Some("guess"));
        assert!(!d.allowed);
        assert_eq!(d.policy_id, reason::APPROVAL_TOKEN_INVALID);
    }

    #[test]
    fn test_wrong_token_blocks_even_when_not_required() {
        let gate = ApprovalGate::new(Some("s3cret".into()));
        let d = gate.evaluate(&not_required(), None, Some("guess"));
        assert_eq!(d.policy_id, reason::APPROVAL_TOKEN_INVALID);
    }

    #[test]
    fn test_approved_requires_token_when_configured() {
        let gate = ApprovalGate::new(Some("s3cret".into()));
        let missing = gate.evaluate(&required(), Some(ApprovalStatus::Approved), None);
        assert_eq!(missing.policy_id, reason::APPROVAL_TOKEN_INVALID);

        let ok = gate.evaluate(&required(), Some(ApprovalStatus::Approved), Some("s3cret"));
        assert!(ok.allowed);
    }

    #[test]
    fn test_not_required_passes() {
        let gate = ApprovalGate::new(Some("s3cret".into()));
        let d = gate.evaluate(&not_required(), None, None);
        assert!(d.allowed);
        assert_eq!(d.policy_id, reason::APPROVAL_NOT_REQUIRED);
    }

    #[test]
    fn test_token_match_is_exact() {
        let gate = ApprovalGate::new(Some("s3cret".into()));
        assert!(gate.token_matches("s3cret"));
        assert!(!gate.token_matches("s3creT"));
        assert!(!gate.token_matches("s3cre"));
        assert!(!gate.token_matches("s3cret!"));
        assert!(!gate.token_matches(""));
        assert!(!ApprovalGate::new(None).token_matches("s3cret"));
    }
}
