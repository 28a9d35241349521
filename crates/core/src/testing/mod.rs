//! Testing utilities for code built on the status stores.
//!
//! [`UnavailableStore`] fails every primitive the way an unreachable backend
//! would, so callers can check that store errors reach them unchanged.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::store::{StatusStore, StoreError};

/// A store whose every call fails with [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    pub fn new() -> Self {
        Self
    }

    fn fail<T>(&self, key: &str) -> Result<T, StoreError> {
        Err(StoreError::Unavailable(format!(
            "store unreachable while accessing {}",
            key
        )))
    }
}

impl StatusStore for UnavailableStore {
    fn hget(&self, key: &str, _field: &str) -> Result<Option<String>, StoreError> {
        self.fail(key)
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.fail(key)
    }

    fn hset_multiple(&self, key: &str, _fields: &[(&str, &str)]) -> Result<(), StoreError> {
        self.fail(key)
    }

    fn hdel(&self, key: &str, _field: &str) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn hsetnx(&self, key: &str, _field: &str, _value: &str) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn hincr_by(&self, key: &str, _field: &str, _amount: i64) -> Result<i64, StoreError> {
        self.fail(key)
    }

    fn sadd(&self, key: &str, _member: &str) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn srem(&self, key: &str, _member: &str) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        self.fail(key)
    }

    fn sdiff(&self, key: &str, _other: &str) -> Result<HashSet<String>, StoreError> {
        self.fail(key)
    }

    fn rpush(&self, key: &str, _value: &str) -> Result<usize, StoreError> {
        self.fail(key)
    }

    fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.fail(key)
    }

    fn lrem(&self, key: &str, _value: &str) -> Result<usize, StoreError> {
        self.fail(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn expire(&self, key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        self.fail(key)
    }

    fn del(&self, keys: &[&str]) -> Result<usize, StoreError> {
        self.fail(keys.first().copied().unwrap_or(""))
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::deposit::{DepositField, DepositState, DepositStatusStore};
    use crate::job::JobStatusStore;
    use crate::store::{MemoryStore, StatusStore};

    /// Deposit and job stores sharing one fresh in-memory backend.
    pub fn memory_stores() -> (DepositStatusStore, JobStatusStore) {
        let store: Arc<dyn StatusStore> = Arc::new(MemoryStore::new());
        (
            DepositStatusStore::new(store.clone()),
            JobStatusStore::new(store),
        )
    }

    /// The fields a depositor submits when registering a deposit.
    pub fn deposit_fields(deposit_id: &str, state: DepositState) -> HashMap<String, String> {
        [
            (DepositField::Uuid, deposit_id),
            (DepositField::State, state.as_str()),
            (DepositField::DepositorName, "depositor"),
            (DepositField::DepositorEmail, "depositor@example.org"),
            (DepositField::PackagingType, "BagIt"),
            (DepositField::FileName, "deposit.zip"),
        ]
        .into_iter()
        .map(|(field, value)| (field.as_str().to_string(), value.to_string()))
        .collect()
    }
}
