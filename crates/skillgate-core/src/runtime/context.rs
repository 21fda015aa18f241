//! Per-request call context threaded through every execution.

use skillgate_types::skill::SkillId;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RecursionError;

/// Skills currently executing for one request, outermost first.
///
/// Cancellation is cooperative: a cancelled context stops new members from
/// starting and abandons leaf invocations, but whoever reserved a gate slot
/// still gets to settle it.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Uuid,
    stack: Vec<SkillId>,
    max_depth: usize,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(max_depth: usize) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            stack: Vec::new(),
            max_depth,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Same call stack under a token that is cancelled with this context's
    /// token, or on its own.
    pub fn child_scope(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn stack(&self) -> &[SkillId] {
        &self.stack
    }

    pub fn contains(&self, skill_id: &SkillId) -> bool {
        self.stack.contains(skill_id)
    }

    /// Child context with `skill_id` pushed. Fails if it is already on the
    /// stack or the stack is full.
    pub fn enter(&self, skill_id: &SkillId) -> Result<Self, RecursionError> {
        if self.contains(skill_id) {
            return Err(RecursionError::Circular {
                skill_id: skill_id.to_string(),
                stack: self.stack.iter().map(ToString::to_string).collect(),
            });
        }
        if self.stack.len() >= self.max_depth {
            return Err(RecursionError::DepthExceeded {
                skill_id: skill_id.to_string(),
                max_depth: self.max_depth,
            });
        }
        let mut child = self.clone();
        child.stack.push(skill_id.clone());
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    #[test]
    fn test_enter_pushes_without_mutating_parent() {
        let root = CallContext::new(4);
        let child = root.enter(&id("flow/a")).unwrap();
        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.request_id, root.request_id);
    }

    #[test]
    fn test_reentry_is_circular() {
        let ctx = CallContext::new(8)
            .enter(&id("flow/a"))
            .unwrap()
            .enter(&id("flow/b"))
            .unwrap();
        let err = ctx.enter(&id("flow/a")).unwrap_err();
        assert_eq!(
            err,
            RecursionError::Circular {
                skill_id: "flow/a".into(),
                stack: vec!["flow/a".into(), "flow/b".into()],
            }
        );
        assert!(err.to_string().contains("flow/a -> flow/b -> flow/a"));
    }

    #[test]
    fn test_child_scope_cancellation_flows_downward() {
        let root = CallContext::new(4);
        let scope = root.child_scope();
        let member = scope.enter(&id("flow/a")).unwrap();

        scope.cancellation().cancel();
        assert!(member.is_cancelled());
        assert!(!root.is_cancelled());

        let other = root.child_scope();
        root.cancellation().cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_depth_limit() {
        let ctx = CallContext::new(1).enter(&id("flow/a")).unwrap();
        let err = ctx.enter(&id("flow/b")).unwrap_err();
        assert!(matches!(err, RecursionError::DepthExceeded { max_depth: 1, .. }));
    }
}
