//! Application state wiring the orchestrator to concrete infrastructure.
//!
//! The orchestrator is generic over its record store; `AppState` pins it to
//! [`Records`], which dispatches to the SQLite or JSON-file backend chosen
//! on the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::ValueEnum;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skillgate_core::catalog::SkillCatalog;
use skillgate_core::clock::SystemClock;
use skillgate_core::orchestrator::Orchestrator;
use skillgate_core::policy::{PermissionChecker, PolicyEngine};
use skillgate_core::repository::{Namespace, RecordStore};
use skillgate_infra::capability::{builtin_capabilities, seed_builtin_metadata};
use skillgate_infra::config::load_governance_config;
use skillgate_infra::crypto::Sha256PlanHasher;
use skillgate_infra::filesystem::{
    self, FsCatalog, JsonFileStore, metadata_dir, permissions_path, records_dir,
    skill_policies_path,
};
use skillgate_infra::sqlite::pool::database_url;
use skillgate_infra::sqlite::{DatabasePool, SqliteRecordStore};
use skillgate_types::config::GovernanceConfig;
use skillgate_types::error::RepositoryError;

/// Which record store backs budget, circuit, composition and feedback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// SQLite database at `{data_dir}/skillgate.db`.
    Sqlite,
    /// One JSON file per record under `{data_dir}/records/`.
    Json,
}

/// The record store selected at startup.
pub enum Records {
    Sqlite(SqliteRecordStore),
    Json(JsonFileStore),
}

impl RecordStore for Records {
    async fn load<T>(&self, ns: Namespace, key: &str) -> Result<Option<T>, RepositoryError>
    where
        T: DeserializeOwned + Send,
    {
        match self {
            Self::Sqlite(store) => store.load(ns, key).await,
            Self::Json(store) => store.load(ns, key).await,
        }
    }

    async fn save<T>(&self, ns: Namespace, key: &str, record: &T) -> Result<(), RepositoryError>
    where
        T: Serialize + Sync,
    {
        match self {
            Self::Sqlite(store) => store.save(ns, key, record).await,
            Self::Json(store) => store.save(ns, key, record).await,
        }
    }

    async fn update<T, R, F>(&self, ns: Namespace, key: &str, f: F) -> Result<R, RepositoryError>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnOnce(&mut Option<T>) -> R + Send,
    {
        match self {
            Self::Sqlite(store) => store.update(ns, key, f).await,
            Self::Json(store) => store.update(ns, key, f).await,
        }
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.keys(ns).await,
            Self::Json(store) => store.keys(ns).await,
        }
    }
}

/// Shared application state used by every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator<Records>,
    pub catalog: Arc<FsCatalog>,
    pub config: GovernanceConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load config, policies and the catalog,
    /// open the record store and wire the orchestrator.
    pub async fn init(store: StoreKind) -> anyhow::Result<Self> {
        let data_dir = filesystem::resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let config = load_governance_config(&data_dir).await;

        let metadata = metadata_dir(&data_dir);
        seed_builtin_metadata(&metadata)?;
        let catalog = Arc::new(FsCatalog::open(&metadata)?);

        let permissions = PermissionChecker::from_path(&permissions_path(&data_dir))?;
        let policies = PolicyEngine::from_path(skill_policies_path(&data_dir));

        let records = match store {
            StoreKind::Sqlite => {
                let url = database_url(&filesystem::database_path(&data_dir));
                Records::Sqlite(SqliteRecordStore::new(DatabasePool::new(&url).await?))
            }
            StoreKind::Json => Records::Json(JsonFileStore::new(records_dir(&data_dir))),
        };

        let orchestrator = Orchestrator::builder(
            config.clone(),
            Arc::new(records),
            catalog.clone(),
            Arc::new(builtin_capabilities()),
            Arc::new(Sha256PlanHasher::new()),
            Arc::new(SystemClock),
        )
        .permissions(permissions)
        .policies(policies)
        .build();

        let warmed = orchestrator.warm().await?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            store = ?store,
            skills = catalog.snapshot().len(),
            feedback = warmed,
            "app state ready"
        );

        Ok(Self {
            orchestrator,
            catalog,
            config,
            data_dir,
        })
    }
}
