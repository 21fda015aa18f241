//! Governance configuration loader for Skillgate.
//!
//! Reads `skillgate.toml` from the data directory (`~/.skillgate/` in
//! production) and deserializes it into [`GovernanceConfig`]. Falls back to
//! defaults when the file is missing or malformed, then applies environment
//! overrides.

use std::path::Path;

use skillgate_types::config::GovernanceConfig;

pub const CONFIG_FILE: &str = "skillgate.toml";

pub const ENV_APPROVAL_TOKEN: &str = "SKILLGATE_APPROVAL_TOKEN";
pub const ENV_PARALLEL_LIMIT: &str = "SKILLGATE_PARALLEL_LIMIT";

/// Load governance configuration from `{data_dir}/skillgate.toml` and apply
/// environment overrides.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning and uses defaults.
pub async fn load_governance_config(data_dir: &Path) -> GovernanceConfig {
    let mut config = read_config_file(data_dir).await;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

async fn read_config_file(data_dir: &Path) -> GovernanceConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return GovernanceConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GovernanceConfig::default();
        }
    };

    match toml::from_str::<GovernanceConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GovernanceConfig::default()
        }
    }
}

/// Apply `SKILLGATE_*` overrides read through `lookup`.
///
/// An unparsable or zero parallel limit is ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut GovernanceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup(ENV_APPROVAL_TOKEN).filter(|t| !t.trim().is_empty()) {
        config.approval.token = Some(token);
    }

    if let Some(raw) = lookup(ENV_PARALLEL_LIMIT) {
        match raw.trim().parse::<usize>() {
            Ok(limit) if limit > 0 => config.composition.parallel_limit = limit,
            _ => tracing::warn!(value = %raw, "Ignoring invalid {ENV_PARALLEL_LIMIT}"),
        }
    }
}
