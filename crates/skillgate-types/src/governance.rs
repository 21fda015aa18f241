//! Persisted governance state: circuit breakers, budget ledger, feedback.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-skill circuit state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub status: CircuitStatus,
    /// Failure timestamps inside the sliding window.
    #[serde(default)]
    pub failures: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    /// Trial calls handed out since entering half-open.
    #[serde(default)]
    pub half_open_attempts: u32,
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Execution tier. Each tier has its own estimated cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    #[default]
    Standard,
    Cheap,
}

impl fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Cheap => write!(f, "cheap"),
        }
    }
}

/// Running spend totals keyed by calendar period.
///
/// Keys are `YYYY-MM-DD` for days and `YYYY-MM` for months. Totals only grow;
/// a new period simply starts a new key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetUsage {
    #[serde(default)]
    pub daily: BTreeMap<String, f64>,
    #[serde(default)]
    pub monthly: BTreeMap<String, f64>,
}

impl BudgetUsage {
    pub fn day_total(&self, day: &str) -> f64 {
        self.daily.get(day).copied().unwrap_or(0.0)
    }

    pub fn month_total(&self, month: &str) -> f64 {
        self.monthly.get(month).copied().unwrap_or(0.0)
    }

    pub fn record(&mut self, day: &str, month: &str, cost: f64) {
        *self.daily.entry(day.to_string()).or_insert(0.0) += cost;
        *self.monthly.entry(month.to_string()).or_insert(0.0) += cost;
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Positive,
    Negative,
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positive" | "up" | "good" => Ok(Self::Positive),
            "negative" | "down" | "bad" => Ok(Self::Negative),
            other => Err(format!("unknown feedback '{other}'")),
        }
    }
}

/// Per-skill feedback tally and resulting confidence multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub confidence: f64,
    pub positive: u32,
    pub negative: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for FeedbackRecord {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            positive: 0,
            negative: 0,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_usage_record_accumulates() {
        let mut usage = BudgetUsage::default();
        usage.record("2026-01-01", "2026-01", 1.0);
        usage.record("2026-01-01", "2026-01", 0.5);
        usage.record("2026-01-02", "2026-01", 1.0);
        assert_eq!(usage.day_total("2026-01-01"), 1.5);
        assert_eq!(usage.day_total("2026-01-02"), 1.0);
        assert_eq!(usage.month_total("2026-01"), 2.5);
        assert_eq!(usage.day_total("2026-02-01"), 0.0);
    }

    #[test]
    fn test_circuit_record_defaults_closed() {
        let record: CircuitRecord = serde_json::from_str(r#"{"status":"closed"}"#).unwrap();
        assert_eq!(record.status, CircuitStatus::Closed);
        assert!(record.failures.is_empty());
        assert_eq!(CircuitStatus::HalfOpen.to_string(), "half_open");
    }
}
