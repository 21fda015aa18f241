//! Per-skill circuit breaker.
//!
//! State moves only `closed -> open -> half_open -> {closed, open}`. The
//! open-to-half-open step happens lazily in [`CircuitBreaker::allow`] once
//! the open interval has elapsed; each half-open trial is reserved under the
//! record lock so no more than `half_open_max_attempts` calls get through.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use skillgate_types::config::CircuitConfig;
use skillgate_types::error::RepositoryError;
use skillgate_types::gate::{GateDecision, GateKind, reason};
use skillgate_types::governance::{CircuitRecord, CircuitStatus};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::repository::{Namespace, RecordStore};

pub struct CircuitBreaker<S> {
    store: Arc<S>,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore> CircuitBreaker<S> {
    pub fn new(store: Arc<S>, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn open_elapsed(&self, record: &CircuitRecord, now: DateTime<Utc>) -> bool {
        record
            .opened_at
            .is_none_or(|at| now >= at + Duration::seconds(self.config.open_seconds as i64))
    }

    fn decision(status: CircuitStatus, allowed: bool) -> GateDecision {
        let decision = match (allowed, status) {
            (false, _) => GateDecision::deny(GateKind::Circuit, reason::CIRCUIT_OPEN),
            (true, CircuitStatus::HalfOpen) => {
                GateDecision::allow(GateKind::Circuit, reason::CIRCUIT_HALF_OPEN)
            }
            (true, _) => GateDecision::allow(GateKind::Circuit, reason::CIRCUIT_CLOSED),
        };
        decision.with_detail(serde_json::json!({ "state": status }))
    }

    pub async fn state(&self, skill_id: &str) -> Result<CircuitRecord, RepositoryError> {
        Ok(self
            .store
            .load::<CircuitRecord>(Namespace::Circuit, skill_id)
            .await?
            .unwrap_or_default())
    }

    /// Read-only view of whether a call would be let through.
    pub async fn peek(&self, skill_id: &str) -> Result<GateDecision, RepositoryError> {
        let record = self.state(skill_id).await?;
        let now = self.clock.now();
        let max = self.config.half_open_max_attempts;
        let decision = match record.status {
            CircuitStatus::Closed => Self::decision(CircuitStatus::Closed, true),
            CircuitStatus::Open if self.open_elapsed(&record, now) => {
                Self::decision(CircuitStatus::HalfOpen, max > 0)
            }
            CircuitStatus::Open => Self::decision(CircuitStatus::Open, false),
            CircuitStatus::HalfOpen => {
                Self::decision(CircuitStatus::HalfOpen, record.half_open_attempts < max)
            }
        };
        Ok(decision)
    }

    /// Let a call through or block it. Reserves a half-open trial when the
    /// breaker is probing.
    pub async fn allow(&self, skill_id: &str) -> Result<GateDecision, RepositoryError> {
        let now = self.clock.now();
        let max = self.config.half_open_max_attempts;
        let decision = self
            .store
            .update::<CircuitRecord, _, _>(Namespace::Circuit, skill_id, |slot| {
                let record = slot.get_or_insert_with(CircuitRecord::default);
                if record.status == CircuitStatus::Open && self.open_elapsed(record, now) {
                    record.status = CircuitStatus::HalfOpen;
                    record.half_open_attempts = 0;
                }
                match record.status {
                    CircuitStatus::Closed => Self::decision(CircuitStatus::Closed, true),
                    CircuitStatus::Open => Self::decision(CircuitStatus::Open, false),
                    CircuitStatus::HalfOpen if record.half_open_attempts < max => {
                        record.half_open_attempts += 1;
                        Self::decision(CircuitStatus::HalfOpen, true)
                    }
                    CircuitStatus::HalfOpen => Self::decision(CircuitStatus::HalfOpen, false),
                }
            })
            .await?;

        info!(
            event = "circuit_decision",
            skill_id,
            allowed = decision.allowed,
            policy_id = %decision.policy_id,
            "circuit breaker check"
        );
        Ok(decision)
    }

    /// Give back a half-open trial reserved by `allow` for a call that never
    /// ran (a later gate blocked it).
    pub async fn release(&self, skill_id: &str) -> Result<(), RepositoryError> {
        self.store
            .update::<CircuitRecord, _, _>(Namespace::Circuit, skill_id, |slot| {
                if let Some(record) = slot
                    && record.status == CircuitStatus::HalfOpen
                {
                    record.half_open_attempts = record.half_open_attempts.saturating_sub(1);
                }
            })
            .await
    }

    pub async fn record_failure(&self, skill_id: &str) -> Result<CircuitStatus, RepositoryError> {
        let now = self.clock.now();
        let window_start = now - Duration::seconds(self.config.window_seconds as i64);
        let threshold = self.config.failure_threshold.max(1) as usize;

        let (before, after) = self
            .store
            .update::<CircuitRecord, _, _>(Namespace::Circuit, skill_id, |slot| {
                let record = slot.get_or_insert_with(CircuitRecord::default);
                let before = record.status;
                record.failures.retain(|at| *at > window_start);
                record.failures.push(now);
                match record.status {
                    CircuitStatus::Closed if record.failures.len() >= threshold => {
                        record.status = CircuitStatus::Open;
                        record.opened_at = Some(now);
                        record.half_open_attempts = 0;
                    }
                    CircuitStatus::HalfOpen => {
                        record.status = CircuitStatus::Open;
                        record.opened_at = Some(now);
                        record.half_open_attempts = 0;
                    }
                    _ => {}
                }
                (before, record.status)
            })
            .await?;

        if before != after {
            warn!(skill_id, from = %before, to = %after, "circuit breaker opened");
        }
        Ok(after)
    }

    pub async fn record_success(&self, skill_id: &str) -> Result<CircuitStatus, RepositoryError> {
        let now = self.clock.now();
        let window_start = now - Duration::seconds(self.config.window_seconds as i64);

        let (before, after) = self
            .store
            .update::<CircuitRecord, _, _>(Namespace::Circuit, skill_id, |slot| {
                let record = slot.get_or_insert_with(CircuitRecord::default);
                let before = record.status;
                match record.status {
                    CircuitStatus::HalfOpen => *record = CircuitRecord::default(),
                    CircuitStatus::Closed => record.failures.retain(|at| *at > window_start),
                    CircuitStatus::Open => {}
                }
                (before, record.status)
            })
            .await?;

        if before != after {
            info!(skill_id, from = %before, to = %after, "circuit breaker closed");
        }
        Ok(after)
    }
}
