//! In-memory [`RecordStore`].

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skillgate_types::error::RepositoryError;
use tokio::sync::Mutex;

use super::{Namespace, RecordStore};

type Slot = Arc<Mutex<Option<serde_json::Value>>>;

/// Records held as JSON values, one async mutex per record.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<(Namespace, String), Slot>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, ns: Namespace, key: &str) -> Slot {
        self.records
            .entry((ns, key.to_string()))
            .or_default()
            .value()
            .clone()
    }
}

impl RecordStore for InMemoryRecordStore {
    async fn load<T>(&self, ns: Namespace, key: &str) -> Result<Option<T>, RepositoryError>
    where
        T: DeserializeOwned + Send,
    {
        let Some(slot) = self.records.get(&(ns, key.to_string())).map(|s| s.value().clone())
        else {
            return Ok(None);
        };
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn save<T>(&self, ns: Namespace, key: &str, record: &T) -> Result<(), RepositoryError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(record)?;
        let slot = self.slot(ns, key);
        *slot.lock().await = Some(value);
        Ok(())
    }

    async fn update<T, R, F>(&self, ns: Namespace, key: &str, f: F) -> Result<R, RepositoryError>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnOnce(&mut Option<T>) -> R + Send,
    {
        let slot = self.slot(ns, key);
        let mut guard = slot.lock().await;
        let mut current: Option<T> = match guard.as_ref() {
            Some(value) => Some(serde_json::from_value(value.clone())?),
            None => None,
        };
        let out = f(&mut current);
        *guard = match current {
            Some(record) => Some(serde_json::to_value(&record)?),
            None => None,
        };
        Ok(out)
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, RepositoryError> {
        let slots: Vec<(String, Slot)> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == ns)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();

        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if slot.lock().await.is_some() {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
