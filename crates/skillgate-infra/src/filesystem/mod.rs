//! Filesystem adapters for Skillgate.
//!
//! The data directory holds everything one installation owns:
//!
//! ```text
//! {data_dir}/
//!   skillgate.toml
//!   metadata/**/*.yaml          skill descriptors
//!   policies/permissions.json   RBAC/ABAC definitions
//!   policies/skill_policies.json
//!   records/{namespace}/*.json  JsonFileStore
//!   skillgate.db                SqliteRecordStore
//! ```

pub mod catalog;
pub mod store;

use std::path::{Path, PathBuf};

pub use catalog::{FsCatalog, RefreshToken};
pub use store::JsonFileStore;

pub const ENV_DATA_DIR: &str = "SKILLGATE_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `SKILLGATE_DATA_DIR` environment variable
/// 2. `~/.skillgate`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".skillgate");
    }

    // Last resort: current directory
    PathBuf::from(".skillgate")
}

pub fn metadata_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("metadata")
}

pub fn permissions_path(data_dir: &Path) -> PathBuf {
    data_dir.join("policies").join("permissions.json")
}

pub fn skill_policies_path(data_dir: &Path) -> PathBuf {
    data_dir.join("policies").join("skill_policies.json")
}

pub fn records_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("records")
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("skillgate.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let data_dir = PathBuf::from("/home/user/.skillgate");
        assert_eq!(
            metadata_dir(&data_dir),
            PathBuf::from("/home/user/.skillgate/metadata")
        );
        assert_eq!(
            permissions_path(&data_dir),
            PathBuf::from("/home/user/.skillgate/policies/permissions.json")
        );
        assert_eq!(
            skill_policies_path(&data_dir),
            PathBuf::from("/home/user/.skillgate/policies/skill_policies.json")
        );
        assert_eq!(
            database_path(&data_dir),
            PathBuf::from("/home/user/.skillgate/skillgate.db")
        );
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var(ENV_DATA_DIR, "/tmp/test-skillgate");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-skillgate"));
        unsafe {
            std::env::remove_var(ENV_DATA_DIR);
        }
    }
}
