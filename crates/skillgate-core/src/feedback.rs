//! Routing feedback: per-skill confidence multipliers.
//!
//! Negative outcomes decay a skill's confidence multiplicatively, positive
//! outcomes recover it by a fixed step. Confidence stays in `[floor, 1.0]`.

use std::sync::Arc;

use dashmap::DashMap;
use skillgate_types::error::RepositoryError;
use skillgate_types::governance::{FeedbackKind, FeedbackRecord};
use skillgate_types::skill::SkillId;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::repository::{Namespace, RecordStore};

/// Read side of feedback, consumed by the router.
pub trait ConfidenceProvider: Send + Sync {
    /// Multiplier in `(0, 1]` applied to a candidate's combined score.
    fn confidence(&self, skill_id: &SkillId) -> f64;

    /// Recorded negative outcomes, used as the first tie-breaker.
    fn negative_count(&self, skill_id: &SkillId) -> u32;
}

/// Provider for routing without feedback: every skill at full confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

impl ConfidenceProvider for NoFeedback {
    fn confidence(&self, _skill_id: &SkillId) -> f64 {
        1.0
    }

    fn negative_count(&self, _skill_id: &SkillId) -> u32 {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackSettings {
    pub decay: f64,
    pub recovery_step: f64,
    pub floor: f64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            decay: 0.8,
            recovery_step: 0.05,
            floor: 0.1,
        }
    }
}

/// Records feedback through a [`RecordStore`] and serves it synchronously
/// from an in-process cache for the router.
pub struct FeedbackTracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: FeedbackSettings,
    cache: DashMap<SkillId, FeedbackRecord>,
}

impl<S: RecordStore> FeedbackTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: FeedbackSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            cache: DashMap::new(),
        }
    }

    /// Load every persisted record into the cache.
    pub async fn warm(&self) -> Result<usize, RepositoryError> {
        let keys = self.store.keys(Namespace::Feedback).await?;
        for key in &keys {
            let Ok(id) = SkillId::parse(key.as_str()) else {
                continue;
            };
            if let Some(record) = self
                .store
                .load::<FeedbackRecord>(Namespace::Feedback, key)
                .await?
            {
                self.remember(id, record);
            }
        }
        debug!(records = self.cache.len(), "feedback cache warmed");
        Ok(self.cache.len())
    }

    /// Apply one outcome and return the new record.
    pub async fn record(
        &self,
        skill_id: &SkillId,
        kind: FeedbackKind,
    ) -> Result<FeedbackRecord, RepositoryError> {
        let settings = self.settings;
        let now = self.clock.now();
        let record = self
            .store
            .update::<FeedbackRecord, _, _>(Namespace::Feedback, skill_id.as_str(), |slot| {
                let record = slot.get_or_insert_with(FeedbackRecord::default);
                match kind {
                    FeedbackKind::Negative => {
                        record.negative += 1;
                        record.confidence = (record.confidence * settings.decay).max(settings.floor);
                    }
                    FeedbackKind::Positive => {
                        record.positive += 1;
                        record.confidence = (record.confidence + settings.recovery_step).min(1.0);
                    }
                }
                record.updated_at = Some(now);
                record.clone()
            })
            .await?;

        info!(
            event = "feedback_recorded",
            skill_id = %skill_id,
            kind = ?kind,
            confidence = record.confidence,
            "routing feedback recorded"
        );
        self.remember(skill_id.clone(), record.clone());
        Ok(record)
    }

    /// Cache `record` unless the cache already holds a later one. Every
    /// outcome bumps exactly one counter, so the counter sum orders records
    /// of one skill even when concurrent writers finish out of order.
    fn remember(&self, skill_id: SkillId, record: FeedbackRecord) {
        let outcomes = |r: &FeedbackRecord| u64::from(r.positive) + u64::from(r.negative);
        self.cache
            .entry(skill_id)
            .and_modify(|cached| {
                if outcomes(&record) >= outcomes(cached) {
                    *cached = record.clone();
                }
            })
            .or_insert_with(|| record.clone());
    }

    pub fn get(&self, skill_id: &SkillId) -> FeedbackRecord {
        self.cache
            .get(skill_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl<S: RecordStore> ConfidenceProvider for FeedbackTracker<S> {
    fn confidence(&self, skill_id: &SkillId) -> f64 {
        self.get(skill_id).confidence.max(self.settings.floor)
    }

    fn negative_count(&self, skill_id: &SkillId) -> u32 {
        self.get(skill_id).negative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::repository::InMemoryRecordStore;

    fn tracker() -> FeedbackTracker<InMemoryRecordStore> {
        FeedbackTracker::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(SystemClock),
            FeedbackSettings::default(),
        )
    }

    fn id(raw: &str) -> SkillId {
        SkillId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_negative_decays_confidence() {
        let tracker = tracker();
        let skill = id("sales/alpha_report");
        assert_eq!(tracker.confidence(&skill), 1.0);

        tracker.record(&skill, FeedbackKind::Negative).await.unwrap();
        assert!((tracker.confidence(&skill) - 0.8).abs() < 1e-9);
        assert_eq!(tracker.negative_count(&skill), 1);
    }

    #[tokio::test]
    async fn test_confidence_has_floor() {
        let tracker = tracker();
        let skill = id("sales/alpha_report");
        for _ in 0..30 {
            tracker.record(&skill, FeedbackKind::Negative).await.unwrap();
        }
        assert!((tracker.confidence(&skill) - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_positive_recovers_up_to_one() {
        let tracker = tracker();
        let skill = id("sales/alpha_report");
        tracker.record(&skill, FeedbackKind::Negative).await.unwrap();
        tracker.record(&skill, FeedbackKind::Positive).await.unwrap();
        assert!((tracker.confidence(&skill) - 0.85).abs() < 1e-9);
        for _ in 0..10 {
            tracker.record(&skill, FeedbackKind::Positive).await.unwrap();
        }
        assert_eq!(tracker.confidence(&skill), 1.0);
    }

    #[test]
    fn test_stale_record_does_not_replace_cached() {
        let tracker = tracker();
        let skill = id("sales/alpha_report");
        let newer = FeedbackRecord {
            confidence: 0.64,
            negative: 2,
            ..FeedbackRecord::default()
        };
        let older = FeedbackRecord {
            confidence: 0.8,
            negative: 1,
            ..FeedbackRecord::default()
        };
        tracker.remember(skill.clone(), newer.clone());
        tracker.remember(skill.clone(), older);
        assert_eq!(tracker.get(&skill), newer);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_leave_cache_current() {
        let tracker = Arc::new(tracker());
        let skill = id("sales/alpha_report");

        let mut handles = Vec::new();
        for i in 0..32 {
            let tracker = Arc::clone(&tracker);
            let skill = skill.clone();
            let kind = if i % 3 == 0 {
                FeedbackKind::Positive
            } else {
                FeedbackKind::Negative
            };
            handles.push(tokio::spawn(async move {
                tracker.record(&skill, kind).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored: FeedbackRecord = tracker
            .store
            .load(Namespace::Feedback, skill.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.positive + stored.negative, 32);
        assert_eq!(tracker.get(&skill), stored);
    }

    #[tokio::test]
    async fn test_warm_loads_persisted_records() {
        let store = Arc::new(InMemoryRecordStore::new());
        let first = FeedbackTracker::new(
            Arc::clone(&store),
            Arc::new(SystemClock),
            FeedbackSettings::default(),
        );
        first
            .record(&id("sales/beta_report"), FeedbackKind::Negative)
            .await
            .unwrap();

        let second =
            FeedbackTracker::new(store, Arc::new(SystemClock), FeedbackSettings::default());
        assert_eq!(second.negative_count(&id("sales/beta_report")), 0);
        assert_eq!(second.warm().await.unwrap(), 1);
        assert_eq!(second.negative_count(&id("sales/beta_report")), 1);
    }
}
