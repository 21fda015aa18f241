//! SQLite record store implementation.
//!
//! Implements `RecordStore` from `skillgate-core` over a single `records`
//! table. Values are stored as JSON text. `update` runs inside a transaction
//! on the single-connection writer pool, which serializes every
//! read-modify-write.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use skillgate_core::repository::{Namespace, RecordStore};
use skillgate_types::error::RepositoryError;
use sqlx::{Sqlite, Transaction};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RecordStore`.
pub struct SqliteRecordStore {
    pool: DatabasePool,
}

impl SqliteRecordStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

async fn upsert(
    tx: &mut Transaction<'_, Sqlite>,
    ns: Namespace,
    key: &str,
    value: &str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO records (namespace, key, value, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(ns.as_str())
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

impl RecordStore for SqliteRecordStore {
    async fn load<T>(&self, ns: Namespace, key: &str) -> Result<Option<T>, RepositoryError>
    where
        T: DeserializeOwned + Send,
    {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM records WHERE namespace = ? AND key = ?")
                .bind(ns.as_str())
                .bind(key)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(query_err)?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn save<T>(&self, ns: Namespace, key: &str, record: &T) -> Result<(), RepositoryError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_string(record)?;
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        upsert(&mut tx, ns, key, &value).await?;
        tx.commit().await.map_err(query_err)
    }

    async fn update<T, R, F>(&self, ns: Namespace, key: &str, f: F) -> Result<R, RepositoryError>
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnOnce(&mut Option<T>) -> R + Send,
    {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM records WHERE namespace = ? AND key = ?")
                .bind(ns.as_str())
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_err)?;
        let mut current: Option<T> = match row {
            Some((value,)) => Some(serde_json::from_str(&value)?),
            None => None,
        };
        let existed = current.is_some();

        let out = f(&mut current);

        match current {
            Some(record) => {
                let value = serde_json::to_string(&record)?;
                upsert(&mut tx, ns, key, &value).await?;
            }
            None if existed => {
                sqlx::query("DELETE FROM records WHERE namespace = ? AND key = ?")
                    .bind(ns.as_str())
                    .bind(key)
                    .execute(&mut *tx)
                    .await
                    .map_err(query_err)?;
            }
            None => {}
        }

        tx.commit().await.map_err(query_err)?;
        Ok(out)
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM records WHERE namespace = ? ORDER BY key")
                .bind(ns.as_str())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
