//! Skill catalog port and immutable snapshots.
//!
//! Each catalog load produces a new [`CatalogSnapshot`]. Readers take an
//! `Arc` to the current snapshot and see one consistent view for the whole
//! request, while a loader swaps in the next snapshot atomically.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use skillgate_types::skill::{SkillDescriptor, SkillId};
use tracing::warn;

/// An immutable set of descriptors, ordered by skill id.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    skills: BTreeMap<SkillId, Arc<SkillDescriptor>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    /// Build a snapshot. Duplicate ids keep the last descriptor seen.
    pub fn new(descriptors: impl IntoIterator<Item = SkillDescriptor>) -> Self {
        let mut skills = BTreeMap::new();
        for descriptor in descriptors {
            let id = descriptor.id.clone();
            if skills.insert(id.clone(), Arc::new(descriptor)).is_some() {
                warn!(skill_id = %id, "duplicate skill id in catalog, keeping last");
            }
        }
        Self {
            skills,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &Arc<SkillDescriptor>> {
        self.skills.values()
    }

    pub fn get(&self, id: &SkillId) -> Option<Arc<SkillDescriptor>> {
        self.skills.get(id).cloned()
    }

    pub fn get_str(&self, id: &str) -> Option<Arc<SkillDescriptor>> {
        SkillId::parse(id).ok().and_then(|id| self.get(&id))
    }

    pub fn contains(&self, id: &SkillId) -> bool {
        self.skills.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// Source of the active skill set.
pub trait SkillCatalog: Send + Sync {
    /// The current snapshot. Cheap; callers hold it for one request.
    fn snapshot(&self) -> Arc<CatalogSnapshot>;

    fn list_skills(&self) -> Vec<Arc<SkillDescriptor>> {
        self.snapshot().list().cloned().collect()
    }

    fn get(&self, id: &SkillId) -> Option<Arc<SkillDescriptor>> {
        self.snapshot().get(id)
    }
}

/// In-process catalog holding a swappable snapshot.
#[derive(Debug, Default)]
pub struct SnapshotCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl SnapshotCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = SkillDescriptor>) -> Self {
        Self::new(CatalogSnapshot::new(descriptors))
    }

    /// Atomically replace the active snapshot.
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(snapshot);
    }
}

impl SkillCatalog for SnapshotCatalog {
    fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
