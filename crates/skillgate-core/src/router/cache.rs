//! Tenant-scoped routing cache with TTL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use skillgate_types::routing::{RoutingDecision, RoutingMode};

use super::RouteRequest;
use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant: String,
    query: String,
    tags: Vec<String>,
    mode: Option<RoutingMode>,
    include_deprecated: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    decision: RoutingDecision,
    expires_at: DateTime<Utc>,
}

/// Caches routing decisions per `(tenant, query, tag set)`, plus the mode
/// and deprecation flags that change the answer.
///
/// Queries are compared lowercased and trimmed; tag order does not matter.
/// Entries are evicted lazily on read once expired.
pub struct RoutingCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RoutingCache {
    pub fn new(ttl_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_seconds as i64),
            clock,
        }
    }

    fn key(tenant: &str, request: &RouteRequest) -> CacheKey {
        CacheKey {
            tenant: tenant.to_string(),
            query: request.query.trim().to_lowercase(),
            tags: request.tags.iter().map(|t| t.to_lowercase()).collect(),
            mode: request.mode,
            include_deprecated: request.include_deprecated,
        }
    }

    pub fn get(&self, tenant: &str, request: &RouteRequest) -> Option<RoutingDecision> {
        let key = Self::key(tenant, request);
        let now = self.clock.now();
        let hit = self.entries.get(&key).map(|e| e.clone())?;
        if hit.expires_at <= now {
            self.entries.remove(&key);
            return None;
        }
        Some(hit.decision)
    }

    pub fn insert(&self, tenant: &str, request: &RouteRequest, decision: RoutingDecision) {
        if self.ttl <= Duration::zero() {
            return;
        }
        self.entries.insert(
            Self::key(tenant, request),
            CacheEntry {
                decision,
                expires_at: self.clock.now() + self.ttl,
            },
        );
    }

    /// Drop everything, e.g. after a catalog reload or feedback change.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use skillgate_types::skill::SkillId;

    fn decision() -> RoutingDecision {
        RoutingDecision {
            skill_id: Some(SkillId::parse("travel/search_flights").unwrap()),
            confidence: 0.9,
            ..RoutingDecision::no_skill_found()
        }
    }

    fn setup() -> (Arc<ManualClock>, RoutingCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = RoutingCache::new(60, clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_roundtrip_normalizes_query() {
        let (_, cache) = setup();
        let request = RouteRequest::new("Find flights").with_tags(["travel"]);
        cache.insert("acme", &request, decision());

        let lookup = RouteRequest::new("  find FLIGHTS ").with_tags(["travel"]);
        let hit = cache.get("acme", &lookup);
        assert_eq!(hit.unwrap().skill_id, decision().skill_id);
    }

    #[test]
    fn test_isolated_by_tenant_and_tags() {
        let (_, cache) = setup();
        cache.insert("acme", &RouteRequest::new("Find flights"), decision());
        assert!(cache.get("beta", &RouteRequest::new("Find flights")).is_none());
        assert!(
            cache
                .get("acme", &RouteRequest::new("Find flights").with_tags(["travel"]))
                .is_none()
        );
    }

    #[test]
    fn test_entries_expire() {
        let (clock, cache) = setup();
        let request = RouteRequest::new("q");
        cache.insert("acme", &request, decision());
        clock.advance(Duration::seconds(59));
        assert!(cache.get("acme", &request).is_some());
        clock.advance(Duration::seconds(1));
        assert!(cache.get("acme", &request).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = RoutingCache::new(0, clock);
        cache.insert("acme", &RouteRequest::new("q"), decision());
        assert!(cache.is_empty());
    }
}
