//! Record store trait definition (port).
//!
//! Budget ledgers, circuit breaker state, composition specs and feedback
//! tallies all persist through [`RecordStore`]. The infrastructure layer
//! (skillgate-infra) implements it with JSON files and SQLite; the in-memory
//! implementation here backs tests and ephemeral runs.

pub mod memory;

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use skillgate_types::error::RepositoryError;

pub use memory::InMemoryRecordStore;

/// Logical partition of the store. Each namespace holds one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Budget,
    Circuit,
    Composition,
    Feedback,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Budget,
        Namespace::Circuit,
        Namespace::Composition,
        Namespace::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Circuit => "circuit",
            Self::Composition => "composition",
            Self::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed persistent storage with per-record exclusive updates.
///
/// Reads (`load`, `keys`) take no lock beyond what the backend needs for a
/// consistent read. `update` is the only read-modify-write path: it holds an
/// exclusive lock scoped to one `(namespace, key)` record while `f` runs, so
/// concurrent updates to the same record are linearizable and never lost.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait RecordStore: Send + Sync + 'static {
    /// Load a record. Returns None if it does not exist.
    fn load<T>(
        &self,
        ns: Namespace,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<T>, RepositoryError>> + Send
    where
        T: DeserializeOwned + Send;

    /// Overwrite a record.
    fn save<T>(
        &self,
        ns: Namespace,
        key: &str,
        record: &T,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send
    where
        T: Serialize + Sync;

    /// Run `f` on the current record under an exclusive per-record lock and
    /// persist the result atomically. Leaving `None` in place deletes the
    /// record. Returns whatever `f` returns.
    fn update<T, R, F>(
        &self,
        ns: Namespace,
        key: &str,
        f: F,
    ) -> impl std::future::Future<Output = Result<R, RepositoryError>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
        R: Send,
        F: FnOnce(&mut Option<T>) -> R + Send;

    /// All keys present in a namespace, sorted.
    fn keys(
        &self,
        ns: Namespace,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
