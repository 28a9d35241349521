//! In-process status store.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{StatusStore, StoreError};

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// Look up a live entry, evicting it first if its TTL has passed.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn hash(&mut self, key: &str) -> Result<Option<&mut HashMap<String, String>>, StoreError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hash_or_insert(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        if self.hash(key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        self.hash(key)?
            .ok_or_else(|| StoreError::Database(format!("hash {} vanished", key)))
    }

    fn set(&mut self, key: &str) -> Result<Option<&mut HashSet<String>>, StoreError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list(&mut self, key: &str) -> Result<Option<&mut Vec<String>>, StoreError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(l),
                ..
            }) => Ok(Some(l)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Collections that become empty stop existing, as in Redis.
    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }
}

/// Thread-safe in-memory implementation of [`StatusStore`].
///
/// State is local to one process, so this backend only coordinates threads.
/// Useful for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStore {
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.hash(key)?.cloned().unwrap_or_default())
    }

    fn hset_multiple(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let hash = inner.hash_or_insert(key)?;
        for (field, value) in fields {
            hash.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let removed = match inner.hash(key)? {
            Some(h) => h.remove(field).is_some(),
            None => false,
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let hash = inner.hash_or_insert(key)?;
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let hash = inner.hash_or_insert(key)?;
        let current = match hash.get(field) {
            Some(v) => v.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                field: field.to_string(),
            })?,
            None => 0,
        };
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| StoreError::Overflow {
                key: key.to_string(),
                field: field.to_string(),
            })?;
        hash.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.set(key)?.is_none() {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        Ok(inner
            .set(key)?
            .map(|s| s.insert(member.to_string()))
            .unwrap_or(false))
    }

    fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let removed = match inner.set(key)? {
            Some(s) => s.remove(member),
            None => false,
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    fn smembers(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.set(key)?.cloned().unwrap_or_default())
    }

    fn sdiff(&self, key: &str, other: &str) -> Result<HashSet<String>, StoreError> {
        let mut inner = self.inner.lock();
        let subtrahend = inner.set(other)?.cloned().unwrap_or_default();
        Ok(inner
            .set(key)?
            .map(|s| s.difference(&subtrahend).cloned().collect())
            .unwrap_or_default())
    }

    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        if inner.list(key)?.is_none() {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match inner.list(key)? {
            Some(list) => {
                list.push(value.to_string());
                Ok(list.len())
            }
            None => Err(StoreError::Database(format!("list {} vanished", key))),
        }
    }

    fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.list(key)?.cloned().unwrap_or_default())
    }

    fn lrem(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let removed = match inner.list(key)? {
            Some(list) => {
                let before = list.len();
                list.retain(|v| v != value);
                before - list.len()
            }
            None => 0,
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        Ok(inner.live(key).is_some())
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.live(key) {
            Some(entry) => {
                entry.expires_at = Instant::now().checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn del(&self, keys: &[&str]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            if inner.live(key).is_some() {
                inner.entries.remove(*key);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip_and_merge() {
        let store = MemoryStore::new();
        store.hset_multiple("h", &[("a", "1"), ("b", "2")]).unwrap();
        store.hset_multiple("h", &[("b", "3")]).unwrap();

        let all = store.hgetall("h").unwrap();
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert_eq!(all.get("b").map(String::as_str), Some("3"));
        assert_eq!(store.hget("h", "missing").unwrap(), None);
    }

    #[test]
    fn test_hsetnx_only_first_wins() {
        let store = MemoryStore::new();
        assert!(store.hsetnx("h", "lock", "a").unwrap());
        assert!(!store.hsetnx("h", "lock", "b").unwrap());
        assert_eq!(store.hget("h", "lock").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_hincr_by_rejects_non_integer() {
        let store = MemoryStore::new();
        assert_eq!(store.hincr_by("h", "n", 5).unwrap(), 5);
        assert_eq!(store.hincr_by("h", "n", -2).unwrap(), 3);

        store.hset_multiple("h", &[("s", "abc")]).unwrap();
        let result = store.hincr_by("h", "s", 1);
        assert!(matches!(result, Err(StoreError::NotAnInteger { .. })));
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.sadd("k", "m").unwrap();
        assert!(matches!(store.hget("k", "f"), Err(StoreError::WrongType(_))));
        assert!(matches!(store.rpush("k", "v"), Err(StoreError::WrongType(_))));
    }

    #[test]
    fn test_empty_collections_stop_existing() {
        let store = MemoryStore::new();
        store.rpush("l", "a").unwrap();
        store.rpush("l", "a").unwrap();
        assert_eq!(store.lrem("l", "a").unwrap(), 2);
        assert!(!store.exists("l").unwrap());

        store.sadd("s", "x").unwrap();
        store.srem("s", "x").unwrap();
        assert!(!store.exists("s").unwrap());
    }

    #[test]
    fn test_sdiff() {
        let store = MemoryStore::new();
        for m in ["a", "b", "c"] {
            store.sadd("left", m).unwrap();
        }
        store.sadd("right", "b").unwrap();

        let diff = store.sdiff("left", "right").unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.contains("a") && diff.contains("c"));
        assert!(store.sdiff("missing", "right").unwrap().is_empty());
    }

    #[test]
    fn test_expire_removes_key_after_ttl() {
        let store = MemoryStore::new();
        store.hset_multiple("h", &[("a", "1")]).unwrap();
        assert!(store.expire("h", Duration::from_millis(20)).unwrap());
        assert!(!store.expire("missing", Duration::from_secs(1)).unwrap());

        assert!(store.exists("h").unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.exists("h").unwrap());
        assert!(store.hgetall("h").unwrap().is_empty());
    }

    #[test]
    fn test_unrepresentable_ttl_keeps_key() {
        let store = MemoryStore::new();
        store.hset_multiple("h", &[("a", "1")]).unwrap();
        store.expire("h", Duration::from_millis(20)).unwrap();

        assert!(store.expire("h", Duration::MAX).unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.exists("h").unwrap());
    }

    #[test]
    fn test_hincr_by_rejects_overflow() {
        let store = MemoryStore::new();
        assert_eq!(store.hincr_by("h", "n", i64::MIN).unwrap(), i64::MIN);
        assert!(matches!(
            store.hincr_by("h", "n", -1),
            Err(StoreError::Overflow { .. })
        ));
        assert_eq!(store.hget("h", "n").unwrap(), Some(i64::MIN.to_string()));
    }

    #[test]
    fn test_del_counts_existing_keys() {
        let store = MemoryStore::new();
        store.sadd("a", "1").unwrap();
        store.rpush("b", "1").unwrap();
        assert_eq!(store.del(&["a", "b", "c"]).unwrap(), 2);
        assert!(!store.exists("a").unwrap());
    }
}
