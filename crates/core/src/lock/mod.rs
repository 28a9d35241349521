//! In-process mutual exclusion keyed by object id.
//!
//! These locks coordinate threads of one process touching the same logical
//! object. They do not coordinate processes; the deposit supervisor lock is
//! the only cross-process exclusion.

mod dynamic;
mod reentrant;
mod striped;

pub use dynamic::DynamicObjectLock;
pub use striped::StripedObjectLock;

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{ConfigError, LockConfig, LockStrategy};

/// Object-scoped lock capability.
///
/// `lock` blocks the calling thread, with no timeout, until it has exclusive
/// access to `id`. Both calls are reentrant for the owning thread, and every
/// `lock` must be paired with an `unlock` from the same thread. Prefer
/// [`ObjectLockGuard`], which releases on every exit path.
pub trait ObjectLock: Send + Sync {
    fn lock(&self, id: &str);

    fn unlock(&self, id: &str);

    /// Short name of the strategy, for logs.
    fn strategy_name(&self) -> &'static str;
}

/// Holds an object lock until dropped.
///
/// Not `Send`: the lock belongs to the thread that took it.
pub struct ObjectLockGuard<'a> {
    lock: &'a dyn ObjectLock,
    id: String,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ObjectLockGuard<'a> {
    /// Block until `id` is locked, returning a guard that unlocks it on drop.
    pub fn acquire(lock: &'a dyn ObjectLock, id: &str) -> Self {
        lock.lock(id);
        Self {
            lock,
            id: id.to_string(),
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ObjectLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(&self.id);
    }
}

/// Factory function to create an object lock from config
pub fn create_object_lock(config: &LockConfig) -> Result<Arc<dyn ObjectLock>, ConfigError> {
    match config.strategy {
        LockStrategy::Dynamic => Ok(Arc::new(DynamicObjectLock::new())),
        LockStrategy::Striped => {
            if config.stripes == 0 {
                return Err(ConfigError::ValidationError(
                    "locks.stripes must be greater than 0".to_string(),
                ));
            }
            Ok(Arc::new(StripedObjectLock::new(config.stripes)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dynamic_lock() {
        let config = LockConfig {
            strategy: LockStrategy::Dynamic,
            stripes: 0,
        };
        let lock = create_object_lock(&config).unwrap();
        assert_eq!(lock.strategy_name(), "dynamic");
    }

    #[test]
    fn test_create_striped_lock() {
        let config = LockConfig {
            strategy: LockStrategy::Striped,
            stripes: 4,
        };
        let lock = create_object_lock(&config).unwrap();
        assert_eq!(lock.strategy_name(), "striped");
    }

    #[test]
    fn test_create_striped_lock_zero_stripes() {
        let config = LockConfig {
            strategy: LockStrategy::Striped,
            stripes: 0,
        };
        let result = create_object_lock(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = DynamicObjectLock::new();
        {
            let guard = ObjectLockGuard::acquire(&locks, "uuid:1");
            assert_eq!(guard.id(), "uuid:1");
            assert!(locks.is_locked("uuid:1"));
        }
        assert!(!locks.is_locked("uuid:1"));
    }

    #[test]
    fn test_guard_releases_on_error_path() {
        fn work(locks: &dyn ObjectLock) -> Result<(), String> {
            let _guard = ObjectLockGuard::acquire(locks, "uuid:2");
            Err("validation failed".to_string())
        }

        let locks = StripedObjectLock::new(4);
        assert!(work(&locks).is_err());
        assert!(!locks.is_locked("uuid:2"));
    }
}
