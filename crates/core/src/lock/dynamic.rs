use std::sync::Arc;

use dashmap::DashMap;

use super::reentrant::ReentrantLock;
use super::ObjectLock;

/// One lock per distinct object id, created on first use.
///
/// Ids never contend with each other, but entries are never evicted: the
/// table grows with every distinct id the process ever locks. Suitable for
/// processes whose set of object ids is bounded over their lifetime; use
/// [`StripedObjectLock`](super::StripedObjectLock) otherwise.
#[derive(Debug, Default)]
pub struct DynamicObjectLock {
    locks: DashMap<String, Arc<ReentrantLock>>,
}

impl DynamicObjectLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids that have a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Whether some thread currently holds the lock for `id`.
    pub fn is_locked(&self, id: &str) -> bool {
        self.locks.get(id).is_some_and(|lock| lock.is_locked())
    }
}

impl ObjectLock for DynamicObjectLock {
    fn lock(&self, id: &str) {
        // The map shard guard must be released before blocking on the lock.
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ReentrantLock::new()))
            .clone();
        lock.lock();
    }

    fn unlock(&self, id: &str) {
        let lock = self.locks.get(id).map(|entry| entry.value().clone());
        if let Some(lock) = lock {
            lock.unlock();
        }
    }

    fn strategy_name(&self) -> &'static str {
        "dynamic"
    }
}
