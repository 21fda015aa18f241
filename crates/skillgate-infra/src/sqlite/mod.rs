//! SQLite storage layer.
//!
//! [`SqliteRecordStore`] backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod record;

pub use pool::DatabasePool;
pub use record::SqliteRecordStore;
