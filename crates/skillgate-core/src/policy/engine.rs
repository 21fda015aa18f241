//! Per-skill policy overrides layered on the risk default.
//!
//! Backed by `policies/skill_policies.json`. The file is re-read whenever
//! its modification time or length changes, so edits take effect without a
//! restart. Evaluations stat the file at most once per check interval.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use skillgate_types::gate::reason;
use tracing::{info, warn};

use super::risk::RiskAssessment;
use super::{PolicyLoadError, matches_glob};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPolicy {
    pub skill_id: String,
    #[serde(default)]
    pub requires_approval: Option<bool>,
    #[serde(default)]
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPolicyFile {
    #[serde(default)]
    pub policies: Vec<SkillPolicy>,
}

/// Whether a request needs approval, and which policy said so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub required: bool,
    pub policy_id: String,
    pub overridden: bool,
}

type Fingerprint = (SystemTime, u64);

#[derive(Debug, Default)]
struct Loaded {
    fingerprint: Option<Fingerprint>,
    policies: Vec<SkillPolicy>,
}

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct PolicyEngine {
    path: Option<PathBuf>,
    loaded: RwLock<Loaded>,
    check_interval: Duration,
    started: Instant,
    /// Milliseconds after `started` before the file is looked at again.
    next_check_ms: AtomicU64,
}

impl PolicyEngine {
    fn with_state(path: Option<PathBuf>, loaded: Loaded) -> Self {
        Self {
            path,
            loaded: RwLock::new(loaded),
            check_interval: DEFAULT_CHECK_INTERVAL,
            started: Instant::now(),
            next_check_ms: AtomicU64::new(0),
        }
    }

    /// Engine with a fixed policy list and no backing file.
    pub fn from_policies(policies: Vec<SkillPolicy>) -> Self {
        Self::with_state(
            None,
            Loaded {
                fingerprint: None,
                policies,
            },
        )
    }

    /// Engine backed by a file. The file may not exist yet.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let engine = Self::with_state(Some(path.into()), Loaded::default());
        engine.refresh();
        engine
    }

    /// How long evaluations trust the loaded policies before checking the
    /// file again. Zero checks on every evaluation.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// True for exactly one caller per elapsed interval.
    fn check_due(&self) -> bool {
        if self.check_interval.is_zero() {
            return true;
        }
        let now = self.started.elapsed().as_millis() as u64;
        let next = self.next_check_ms.load(Ordering::Acquire);
        if now < next {
            return false;
        }
        let interval = self.check_interval.as_millis() as u64;
        self.next_check_ms
            .compare_exchange(next, now + interval, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn fingerprint(path: &Path) -> Option<Fingerprint> {
        let meta = std::fs::metadata(path).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    fn read(path: &Path) -> Result<Vec<SkillPolicy>, PolicyLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: SkillPolicyFile =
            serde_json::from_str(&raw).map_err(|source| PolicyLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(file.policies)
    }

    /// Reload if the backing file changed. Returns true when it reloaded.
    /// A broken file keeps the previous policies in force.
    pub fn refresh(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let current = Self::fingerprint(path);
        {
            let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
            if loaded.fingerprint == current {
                return false;
            }
        }

        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        if loaded.fingerprint == current {
            return false;
        }
        match current {
            None => {
                loaded.policies.clear();
                loaded.fingerprint = None;
            }
            Some(fingerprint) => match Self::read(path) {
                Ok(policies) => {
                    info!(path = %path.display(), count = policies.len(), "skill policies loaded");
                    loaded.policies = policies;
                    loaded.fingerprint = Some(fingerprint);
                }
                Err(e) => {
                    warn!(error = %e, "failed to reload skill policies, keeping previous");
                    loaded.fingerprint = Some(fingerprint);
                    return false;
                }
            },
        }
        true
    }

    /// Resolve the approval requirement for a skill. An explicit override's
    /// `requires_approval` replaces the risk default; an override without it
    /// only renames the policy id.
    pub fn requirement(&self, skill_id: &str, risk: &RiskAssessment) -> ApprovalRequirement {
        if self.path.is_some() && self.check_due() {
            self.refresh();
        }
        let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
        let matched = loaded
            .policies
            .iter()
            .find(|p| matches_glob(&p.skill_id, skill_id));

        match matched {
            Some(policy) => ApprovalRequirement {
                required: policy.requires_approval.unwrap_or(risk.requires_approval),
                policy_id: policy
                    .policy_id
                    .clone()
                    .unwrap_or_else(|| reason::POLICY_OVERRIDE.to_string()),
                overridden: true,
            },
            None => ApprovalRequirement {
                required: risk.requires_approval,
                policy_id: reason::POLICY_DEFAULT.to_string(),
                overridden: false,
            },
        }
    }
}
