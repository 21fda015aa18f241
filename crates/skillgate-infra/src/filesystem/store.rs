//! JSON-file record store.
//!
//! One file per record at `{root}/{namespace}/{encoded key}.json`. Writes go
//! to a temporary sibling and are renamed into place, so readers never see a
//! partial record. `update` serializes on a per-record async lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skillgate_core::repository::{Namespace, RecordStore};
use skillgate_types::error::RepositoryError;
use tokio::sync::Mutex;
use uuid::Uuid;

const EXTENSION: &str = "json";

#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    locks: DashMap<(Namespace, String), Arc<Mutex<()>>>,
}

impl JsonFileStore {
    /// Store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.as_str())
    }

    fn record_path(&self, ns: Namespace, key: &str) -> PathBuf {
        self.namespace_dir(ns)
            .join(format!("{}.{EXTENSION}", encode_key(key)))
    }

    fn lock(&self, ns: Namespace, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((ns, key.to_string()))
            .or_default()
            .value()
            .clone()
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, RepositoryError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Query(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Records are serialized by the caller so no borrow of the record is
    /// held across the file I/O below.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
        let parent = path
            .parent()
            .ok_or_else(|| RepositoryError::Query(format!("no parent for {}", path.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to create {}: {e}", parent.display())))?;

        let tmp_path = parent.join(format!(".{}.tmp", Uuid::now_v7()));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to write {}: {e}", tmp_path.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(RepositoryError::Query(format!(
                "Failed to replace {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<(), RepositoryError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepositoryError::Query(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Keys may contain `/`. Percent-encode the two characters that matter.
fn encode_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

fn decode_key(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}

impl RecordStore for JsonFileStore {
    async fn load<T>(&self, ns: Namespace, key: &str) -> Result<Option<T>, RepositoryError>
    where
        T: DeserializeOwned + Send,
    {
        self.read(&self.record_path(ns, key)).await
    }

    async fn save<T>(&self, ns: Namespace, key: &str, record: &T) -> Result<(), RepositoryError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec_pretty(record)?;
        let lock = self.lock(ns, key);
        let _guard = lock.lock().await;
        self.write(&self.record_path(ns, key), &bytes).await
    }

    async fn update<T, R, F>(&self, ns: Namespace, key: &str, f: F) -> Result<R, RepositoryError>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnOnce(&mut Option<T>) -> R + Send,
    {
        let lock = self.lock(ns, key);
        let _guard = lock.lock().await;
        let path = self.record_path(ns, key);

        let mut current: Option<T> = self.read(&path).await?;
        let existed = current.is_some();
        let out = f(&mut current);
        let bytes = current.map(|record| serde_json::to_vec_pretty(&record)).transpose()?;
        match bytes {
            Some(bytes) => self.write(&path, &bytes).await?,
            None if existed => self.remove(&path).await?,
            None => {}
        }
        Ok(out)
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, RepositoryError> {
        let dir = self.namespace_dir(ns);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RepositoryError::Query(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                keys.push(decode_key(stem));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
