//! Spend tracking against per-request, daily and monthly limits.
//!
//! `evaluate` is a read-only check. `authorize` re-checks and records the
//! charge inside one exclusive store update, so concurrent charges are
//! never lost and a denied request never writes usage. A caller-supplied
//! cost must be finite and non-negative, otherwise usage could go down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillgate_types::config::BudgetConfig;
use skillgate_types::error::RepositoryError;
use skillgate_types::gate::{GateDecision, GateKind, reason};
use skillgate_types::governance::{BudgetTier, BudgetUsage};
use tracing::info;

use crate::clock::Clock;
use crate::repository::{Namespace, RecordStore};

const DEFAULT_LEDGER: &str = "global";

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub reason: String,
    pub tier: BudgetTier,
    pub estimated_cost: f64,
    pub day_total: f64,
    pub month_total: f64,
}

impl BudgetCheck {
    pub fn to_gate_decision(&self) -> GateDecision {
        let detail = serde_json::json!({
            "tier": self.tier,
            "estimated_cost": self.estimated_cost,
            "day_total": self.day_total,
            "month_total": self.month_total,
        });
        if self.allowed {
            GateDecision::allow(GateKind::Budget, reason::BUDGET_OK).with_detail(detail)
        } else if self.reason == reason::INVALID_COST {
            GateDecision::deny(GateKind::Budget, reason::INVALID_COST).with_detail(detail)
        } else {
            GateDecision::deny(GateKind::Budget, self.reason.clone())
                .with_reason(reason::BUDGET_EXCEEDED)
                .with_detail(detail)
        }
    }
}

fn period_keys(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%Y-%m").to_string(),
    )
}

pub struct BudgetManager<S> {
    store: Arc<S>,
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
    ledger: String,
}

impl<S: RecordStore> BudgetManager<S> {
    pub fn new(store: Arc<S>, config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            ledger: DEFAULT_LEDGER.to_string(),
        }
    }

    /// Charge a different ledger record (e.g. per tenant).
    pub fn with_ledger(mut self, ledger: impl Into<String>) -> Self {
        self.ledger = ledger.into();
        self
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Tier and cost for the next call given current usage. Switches to the
    /// cheap tier once remaining daily budget drops below the threshold.
    pub fn quote(&self, usage: &BudgetUsage, day: &str) -> (BudgetTier, f64) {
        let remaining = self.config.daily_limit - usage.day_total(day);
        if remaining < self.config.low_remaining_threshold {
            (BudgetTier::Cheap, self.config.cheap_cost)
        } else {
            (BudgetTier::Standard, self.config.standard_cost)
        }
    }

    fn check(&self, usage: &BudgetUsage, now: DateTime<Utc>, cost_override: Option<f64>) -> BudgetCheck {
        let (day, month) = period_keys(now);
        let (tier, quoted) = self.quote(usage, &day);
        let estimated_cost = cost_override.unwrap_or(quoted);
        let day_total = usage.day_total(&day);
        let month_total = usage.month_total(&month);

        let denied = if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            Some(reason::INVALID_COST)
        } else if estimated_cost > self.config.per_request_limit {
            Some(reason::PER_REQUEST_LIMIT_EXCEEDED)
        } else if day_total + estimated_cost > self.config.daily_limit {
            Some(reason::DAILY_LIMIT_EXCEEDED)
        } else if month_total + estimated_cost > self.config.monthly_limit {
            Some(reason::MONTHLY_LIMIT_EXCEEDED)
        } else {
            None
        };

        BudgetCheck {
            allowed: denied.is_none(),
            reason: denied.unwrap_or(reason::BUDGET_OK).to_string(),
            tier,
            estimated_cost,
            day_total,
            month_total,
        }
    }

    pub async fn usage(&self) -> Result<BudgetUsage, RepositoryError> {
        Ok(self
            .store
            .load::<BudgetUsage>(Namespace::Budget, &self.ledger)
            .await?
            .unwrap_or_default())
    }

    /// Read-only check. Takes no lock and writes nothing.
    pub async fn evaluate(&self, cost_override: Option<f64>) -> Result<BudgetCheck, RepositoryError> {
        let usage = self.usage().await?;
        Ok(self.check(&usage, self.clock.now(), cost_override))
    }

    /// Check and, when allowed, record the charge atomically.
    pub async fn authorize(&self, cost_override: Option<f64>) -> Result<BudgetCheck, RepositoryError> {
        let now = self.clock.now();
        let (day, month) = period_keys(now);
        let check = self
            .store
            .update::<BudgetUsage, _, _>(Namespace::Budget, &self.ledger, |slot| {
                let usage = slot.get_or_insert_with(BudgetUsage::default);
                let check = self.check(usage, now, cost_override);
                if check.allowed {
                    usage.record(&day, &month, check.estimated_cost);
                }
                check
            })
            .await?;

        info!(
            event = "budget_decision",
            allowed = check.allowed,
            policy_id = %check.reason,
            tier = %check.tier,
            cost = check.estimated_cost,
            "budget authorization"
        );
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::InMemoryRecordStore;
    use chrono::{Duration, TimeZone};

    fn manager(config: BudgetConfig) -> (Arc<ManualClock>, BudgetManager<InMemoryRecordStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
        ));
        let manager = BudgetManager::new(Arc::new(InMemoryRecordStore::new()), config, clock.clone());
        (clock, manager)
    }

    fn limits(per_request: f64, daily: f64, monthly: f64) -> BudgetConfig {
        BudgetConfig {
            per_request_limit: per_request,
            daily_limit: daily,
            monthly_limit: monthly,
            low_remaining_threshold: 0.0,
            standard_cost: 1.0,
            cheap_cost: 0.5,
        }
    }

    #[tokio::test]
    async fn test_blocks_expensive_request() {
        let (_, manager) = manager(limits(0.5, 10.0, 10.0));
        let check = manager.authorize(None).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.reason, reason::PER_REQUEST_LIMIT_EXCEEDED);
        assert_eq!(manager.usage().await.unwrap(), BudgetUsage::default());
    }

    #[tokio::test]
    async fn test_low_remaining_selects_cheap_tier() {
        let (_, manager) = manager(BudgetConfig {
            per_request_limit: 5.0,
            daily_limit: 1.0,
            monthly_limit: 10.0,
            low_remaining_threshold: 1.5,
            standard_cost: 1.0,
            cheap_cost: 0.4,
        });
        let check = manager.authorize(None).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.tier, BudgetTier::Cheap);
        assert!((check.estimated_cost - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_third_call_exceeds_daily_and_new_day_resets() {
        let (clock, manager) = manager(limits(5.0, 2.0, 100.0));
        assert!(manager.authorize(None).await.unwrap().allowed);
        assert!(manager.authorize(None).await.unwrap().allowed);
        let third = manager.authorize(None).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.reason, reason::DAILY_LIMIT_EXCEEDED);

        clock.advance(Duration::days(1));
        assert!(manager.authorize(None).await.unwrap().allowed);
        let usage = manager.usage().await.unwrap();
        assert_eq!(usage.day_total("2026-01-01"), 2.0);
        assert_eq!(usage.day_total("2026-01-02"), 1.0);
        assert_eq!(usage.month_total("2026-01"), 3.0);
    }

    #[tokio::test]
    async fn test_monthly_limit() {
        let (clock, manager) = manager(limits(5.0, 10.0, 2.0));
        assert!(manager.authorize(None).await.unwrap().allowed);
        clock.advance(Duration::days(1));
        assert!(manager.authorize(None).await.unwrap().allowed);
        clock.advance(Duration::days(1));
        let check = manager.authorize(None).await.unwrap();
        assert_eq!(check.reason, reason::MONTHLY_LIMIT_EXCEEDED);
    }

    #[tokio::test]
    async fn test_invalid_cost_override_is_denied_without_charge() {
        let (_, manager) = manager(limits(5.0, 10.0, 10.0));
        assert!(manager.authorize(None).await.unwrap().allowed);
        let before = manager.usage().await.unwrap();

        for cost in [-3.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let check = manager.authorize(Some(cost)).await.unwrap();
            assert!(!check.allowed, "cost {cost} was allowed");
            assert_eq!(check.reason, reason::INVALID_COST);
            assert!(!manager.evaluate(Some(cost)).await.unwrap().allowed);
        }
        assert_eq!(manager.usage().await.unwrap(), before);
        assert_eq!(before.day_total("2026-01-01"), 1.0);

        let free = manager.authorize(Some(0.0)).await.unwrap();
        assert!(free.allowed);
        assert_eq!(free.to_gate_decision().policy_id, reason::BUDGET_OK);
    }

    #[test]
    fn test_invalid_cost_decision_names_itself() {
        let check = BudgetCheck {
            allowed: false,
            reason: reason::INVALID_COST.into(),
            tier: BudgetTier::Standard,
            estimated_cost: -1.0,
            day_total: 0.0,
            month_total: 0.0,
        };
        let decision = check.to_gate_decision();
        assert_eq!(decision.policy_id, reason::INVALID_COST);
        assert_eq!(decision.reason, reason::INVALID_COST);
    }

    #[tokio::test]
    async fn test_evaluate_does_not_record() {
        let (_, manager) = manager(limits(5.0, 2.0, 100.0));
        for _ in 0..5 {
            assert!(manager.evaluate(None).await.unwrap().allowed);
        }
        assert_eq!(manager.usage().await.unwrap(), BudgetUsage::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_charges_converge() {
        const TASKS: usize = 8;
        const CHARGES: usize = 20;
        let (_, manager) = manager(limits(5.0, 1_000.0, 1_000.0));
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                for _ in 0..CHARGES {
                    assert!(manager.authorize(None).await.unwrap().allowed);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let usage = manager.usage().await.unwrap();
        assert_eq!(usage.day_total("2026-01-01"), (TASKS * CHARGES) as f64);
    }

    #[test]
    fn test_denied_gate_decision_carries_reason() {
        let check = BudgetCheck {
            allowed: false,
            reason: reason::DAILY_LIMIT_EXCEEDED.into(),
            tier: BudgetTier::Standard,
            estimated_cost: 1.0,
            day_total: 2.0,
            month_total: 2.0,
        };
        let decision = check.to_gate_decision();
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id, reason::DAILY_LIMIT_EXCEEDED);
        assert_eq!(decision.reason, reason::BUDGET_EXCEEDED);
    }
}
