//! Shared key/value store abstraction.
//!
//! Deposit and job status live in a store that every worker and supervisor
//! process can reach. The store only has to offer a handful of Redis-style
//! primitives over string keys: hashes, sets, ordered lists, atomic
//! increment, set-if-absent, expiry and deletion.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};

/// Error type for store operations.
///
/// Errors are surfaced to callers unchanged; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached (open failure, busy, locked).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure.
    #[error("Database error: {0}")]
    Database(String),

    /// An increment targeted a field whose value is not an integer.
    #[error("Field {field} of {key} does not hold an integer")]
    NotAnInteger { key: String, field: String },

    /// A key was used with a primitive of a different type.
    #[error("Key {0} holds a value of another type")]
    WrongType(String),

    /// An increment would take an integer field past the `i64` range.
    #[error("Increment of field {field} of {key} would overflow")]
    Overflow { key: String, field: String },
}

/// The primitives every status backend must provide.
///
/// Each method is a single atomic operation against the store. Composite
/// reads built on top of these (e.g. walking a list and fetching each hash)
/// are not snapshots.
pub trait StatusStore: Send + Sync {
    /// Read a single hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Read every field of a hash. Missing keys yield an empty map.
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Merge-write fields into a hash.
    fn hset_multiple(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError>;

    /// Remove a hash field. Returns true if it existed.
    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Set a hash field only if it is absent. Returns true iff this call set it.
    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomically add `amount` to an integer hash field, returning the new value.
    fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64, StoreError>;

    /// Add a member to a set. Returns true if it was not already present.
    fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove a member from a set. Returns true if it was present.
    fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of a set.
    fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Members of `key` that are not members of `other`.
    fn sdiff(&self, key: &str, other: &str) -> Result<HashSet<String>, StoreError>;

    /// Append to the tail of a list, returning the new length.
    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// The entire list, head first.
    fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Remove every occurrence of `value` from a list, returning how many were removed.
    fn lrem(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Whether the key currently holds any value.
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Schedule the key for removal after `ttl`. Returns false if the key does not exist.
    ///
    /// A `ttl` too large to represent as a deadline leaves the key with no expiry.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete keys, returning how many existed.
    fn del(&self, keys: &[&str]) -> Result<usize, StoreError>;
}

/// Key schema shared by every process.
pub mod keys {
    /// Set of every known deposit id.
    pub const DEPOSITS: &str = "deposits";

    pub fn deposit_status(deposit_id: &str) -> String {
        format!("deposit-status:{}", deposit_id)
    }

    pub fn uploaded(deposit_id: &str) -> String {
        format!("ingests-uploaded:{}", deposit_id)
    }

    pub fn confirmed(deposit_id: &str) -> String {
        format!("ingests-confirmed:{}", deposit_id)
    }

    pub fn job_status(job_id: &str) -> String {
        format!("job-status:{}", job_id)
    }

    pub fn deposit_jobs(deposit_id: &str) -> String {
        format!("deposit-to-jobs:{}", deposit_id)
    }
}

/// Factory function to create a store from config
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn StatusStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )?)),
    }
}

/// Current wall-clock time as milliseconds since the Unix epoch, the format
/// timestamps are stored in.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(keys::deposit_status("d1"), "deposit-status:d1");
        assert_eq!(keys::uploaded("d1"), "ingests-uploaded:d1");
        assert_eq!(keys::confirmed("d1"), "ingests-confirmed:d1");
        assert_eq!(keys::job_status("j1"), "job-status:j1");
        assert_eq!(keys::deposit_jobs("d1"), "deposit-to-jobs:d1");
    }

    #[test]
    fn test_create_memory_store() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        };
        let store = create_store(&config).unwrap();
        assert!(!store.exists("anything").unwrap());
    }

    #[test]
    fn test_create_sqlite_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: temp_dir.path().join("status.db"),
            busy_timeout_ms: 1000,
        };
        let store = create_store(&config).unwrap();
        store.sadd("k", "v").unwrap();
        assert!(store.exists("k").unwrap());
    }
}
