//! Thread-reentrant lock with explicit lock/unlock calls.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

/// A lock the owning thread may take repeatedly; it is released once
/// `unlock` has been called as many times as `lock`.
///
/// Unlike a guard-based mutex, acquisition and release are separate calls so
/// they can be driven by an object id from different call sites.
#[derive(Debug, Default)]
pub(crate) struct ReentrantLock {
    state: Mutex<Ownership>,
    released: Condvar,
}

impl ReentrantLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread owns the lock.
    pub(crate) fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let owner = state.owner;
            match owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(holder) if holder == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut state),
            }
        }
    }

    /// Release one level of ownership. Returns false, and does nothing, if
    /// the calling thread does not own the lock.
    pub(crate) fn unlock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            warn!("Unlock from a thread that does not hold the lock; ignoring");
            return false;
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        true
    }

    /// Whether any thread currently holds the lock.
    pub(crate) fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reentrant_from_same_thread() {
        let lock = ReentrantLock::new();
        lock.lock();
        lock.lock();
        assert!(lock.unlock());
        assert!(lock.is_locked());
        assert!(lock.unlock());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_unlock_without_ownership_is_ignored() {
        let lock = ReentrantLock::new();
        assert!(!lock.unlock());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_other_thread_waits_for_release() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock();

        let (tx, rx) = mpsc::channel();
        let contender = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.lock();
                tx.send(()).unwrap();
                lock.unlock();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        lock.unlock();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        contender.join().unwrap();
    }
}
