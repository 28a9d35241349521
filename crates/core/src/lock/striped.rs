use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::reentrant::ReentrantLock;
use super::ObjectLock;

/// A fixed array of locks that object ids hash into.
///
/// Memory stays proportional to the stripe count no matter how many ids are
/// locked. Two unrelated ids that land in the same stripe contend.
#[derive(Debug)]
pub struct StripedObjectLock {
    stripes: Box<[ReentrantLock]>,
}

impl StripedObjectLock {
    /// Create `stripes` locks up front. Panics if `stripes` is 0.
    pub fn new(stripes: usize) -> Self {
        assert!(stripes > 0, "striped lock needs at least one stripe");
        Self {
            stripes: (0..stripes).map(|_| ReentrantLock::new()).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Index of the stripe guarding `id`. Stable for the life of the process.
    pub fn slot_for(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Whether the stripe guarding `id` is currently held.
    pub fn is_locked(&self, id: &str) -> bool {
        self.stripes[self.slot_for(id)].is_locked()
    }
}

impl ObjectLock for StripedObjectLock {
    fn lock(&self, id: &str) {
        self.stripes[self.slot_for(id)].lock();
    }

    fn unlock(&self, id: &str) {
        self.stripes[self.slot_for(id)].unlock();
    }

    fn strategy_name(&self) -> &'static str {
        "striped"
    }
}
