//! Filesystem skill catalog.
//!
//! Loads every `*.yaml` / `*.yml` under the metadata directory (recursively)
//! as one [`SkillDescriptor`] each. Files that fail to parse or validate are
//! skipped with a warning so one bad descriptor never hides the rest.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::Context;
use skillgate_core::catalog::{CatalogSnapshot, SkillCatalog, SnapshotCatalog};
use skillgate_types::skill::SkillDescriptor;

/// Cheap change detector: number of descriptor files and the newest mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshToken {
    pub files: usize,
    pub newest: Option<SystemTime>,
}

#[derive(Debug)]
pub struct FsCatalog {
    dir: PathBuf,
    current: SnapshotCatalog,
    token: Mutex<Option<RefreshToken>>,
}

impl FsCatalog {
    /// Open and load the catalog rooted at `dir`. A missing directory is an
    /// empty catalog.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let catalog = Self {
            dir: dir.into(),
            current: SnapshotCatalog::default(),
            token: Mutex::new(None),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan and swap in a new snapshot. Returns the number of skills.
    pub fn reload(&self) -> anyhow::Result<usize> {
        let files = descriptor_files(&self.dir)?;
        let token = token_for(&files);

        let mut descriptors = Vec::with_capacity(files.len());
        for path in &files {
            match load_descriptor(path) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Skipping invalid skill descriptor");
                }
            }
        }

        let count = descriptors.len();
        self.current.replace(CatalogSnapshot::new(descriptors));
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        tracing::info!(dir = %self.dir.display(), skills = count, "catalog loaded");
        Ok(count)
    }

    /// Reload only when the refresh token moved. Returns whether a reload
    /// happened.
    pub fn reload_if_changed(&self) -> anyhow::Result<bool> {
        let token = token_for(&descriptor_files(&self.dir)?);
        let unchanged = *self.token.lock().unwrap_or_else(|e| e.into_inner()) == Some(token);
        if unchanged {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }
}

impl SkillCatalog for FsCatalog {
    fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.snapshot()
    }
}

fn load_descriptor(path: &Path) -> anyhow::Result<SkillDescriptor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let descriptor: SkillDescriptor = serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    descriptor
        .validate()
        .with_context(|| format!("Invalid descriptor in {}", path.display()))?;
    Ok(descriptor)
}

/// Descriptor files under `dir`, sorted for a stable load order.
fn descriptor_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory: {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_descriptor(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_descriptor(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

fn token_for(files: &[PathBuf]) -> RefreshToken {
    RefreshToken {
        files: files.len(),
        newest: files
            .iter()
            .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillgate_types::skill::SkillId;
    use std::time::Duration;
    use tempfile::tempdir;

    const ECHO: &str = r#"
id: text/echo
name: Echo
description: Echo the payload back unchanged
version: 1.2.0
tags: [text]
entrypoint: "builtin:echo"
"#;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let catalog = FsCatalog::open(dir.path().join("metadata")).unwrap();
        assert!(catalog.snapshot().is_empty());
    }

    #[test]
    fn test_loads_nested_yaml_and_skips_invalid() {
        let dir = tempdir().unwrap();
        write(dir.path(), "text/echo.yaml", ECHO);
        write(
            dir.path(),
            "admin/purge.yml",
            "id: admin/purge\nversion: 0.1.0\nentrypoint: \"builtin:echo\"\nrisk:\n  level: high\n",
        );
        // No namespace in the id.
        write(dir.path(), "bad/id.yaml", "id: echo\nversion: 0.1.0\nentrypoint: \"builtin:echo\"\n");
        // Deprecated without reason or replacement.
        write(
            dir.path(),
            "bad/deprecated.yaml",
            "id: old/thing\nversion: 0.1.0\nentrypoint: \"builtin:echo\"\ndeprecated: true\n",
        );
        write(dir.path(), "notes.txt", "not a descriptor");

        let catalog = FsCatalog::open(dir.path()).unwrap();
        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.len(), 2);

        let echo = snapshot.get(&SkillId::parse("text/echo").unwrap()).unwrap();
        assert_eq!(echo.version.to_string(), "1.2.0");
        assert_eq!(echo.contract.entrypoint, "builtin:echo");
        assert!(echo.tags.contains("text"));
        assert!(snapshot.get_str("admin/purge").is_some());
    }

    #[test]
    fn test_reload_if_changed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "echo.yaml", ECHO);
        let catalog = FsCatalog::open(dir.path()).unwrap();
        let before = catalog.snapshot();

        assert!(!catalog.reload_if_changed().unwrap());
        assert!(Arc::ptr_eq(&before, &catalog.snapshot()));

        std::thread::sleep(Duration::from_millis(20));
        write(
            dir.path(),
            "upper.yaml",
            "id: text/upper\nversion: 0.1.0\nentrypoint: \"builtin:upper\"\n",
        );
        assert!(catalog.reload_if_changed().unwrap());
        assert_eq!(catalog.snapshot().len(), 2);
        // The old snapshot is untouched.
        assert_eq!(before.len(), 1);
    }
}
