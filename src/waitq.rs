//! Wait queues.
//!
//! A FIFO of waiters that get notified when some event occurs. Wakers must
//! finish the state change they are announcing *before* calling
//! [`WaitQueue::wake_many`], and should hold the lock of the resource they
//! changed while waking, so that waiters observe events in order.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

/// A registered interest in a wait queue.
///
/// Waiters are compared by identity, so the same `Arc<Waiter>` must be used
/// to add and to remove.
pub struct Waiter {
    wakeup: Box<dyn Fn() + Send + Sync>,
}

impl Waiter {
    pub fn new<F>(wakeup: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            wakeup: Box::new(wakeup),
        })
    }

    fn wake(&self) {
        (self.wakeup)()
    }
}

#[derive(Default)]
pub struct WaitQueue {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
}

/// A locked wait queue.
pub struct WaitQueueGuard<'a> {
    waiters: MutexGuard<'a, VecDeque<Arc<Waiter>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn lock(&self) -> WaitQueueGuard<'_> {
        WaitQueueGuard {
            waiters: self.waiters.lock(),
        }
    }

    /// Lock, add `waiter`, unlock.
    pub fn wait(&self, waiter: &Arc<Waiter>) {
        self.lock().add(waiter);
    }

    /// Wake up to `count` waiters, oldest first.
    ///
    /// Each wake-up callback runs with the queue unlocked, so callbacks may
    /// take other locks (including thread locks) freely.
    pub fn wake_many(&self, count: usize) -> usize {
        let mut woken = 0;
        while woken < count {
            let next = self.waiters.lock().pop_front();
            match next {
                Some(waiter) => {
                    waiter.wake();
                    woken += 1;
                }
                None => break,
            }
        }
        woken
    }

    pub fn wake_all(&self) -> usize {
        self.wake_many(usize::MAX)
    }

    /// Remove `waiter` and run its wake-up callback, if it is registered here.
    pub fn wake_specific(&self, waiter: &Arc<Waiter>) -> bool {
        let removed = self.lock().remove(waiter);
        if removed {
            waiter.wake();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WaitQueueGuard<'_> {
    pub fn add(&mut self, waiter: &Arc<Waiter>) {
        self.waiters.push_back(waiter.clone());
    }

    /// Returns `false` if `waiter` was not registered.
    pub fn remove(&mut self, waiter: &Arc<Waiter>) -> bool {
        match self.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, waiter: &Arc<Waiter>) -> bool {
        self.waiters.iter().any(|w| Arc::ptr_eq(w, waiter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::vec::Vec;

    #[test]
    fn test_wake_many_is_fifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = WaitQueue::new();
        let waiters: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                Waiter::new(move || order.lock().push(i))
            })
            .collect();
        for waiter in &waiters {
            queue.wait(waiter);
        }

        assert_eq!(queue.wake_many(2), 2);
        assert_eq!(*order.lock(), [0, 1]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.wake_all(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_removed_waiter_is_not_woken() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let waiter = Waiter::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        let queue = WaitQueue::new();
        queue.wait(&waiter);
        assert!(queue.lock().remove(&waiter));
        assert!(!queue.lock().remove(&waiter));
        assert_eq!(queue.wake_all(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wake_callback_may_relock_queue() {
        let queue = Arc::new(WaitQueue::new());
        let inner = queue.clone();
        let waiter = Waiter::new(move || {
            // would deadlock if the queue were still locked
            let _ = inner.len();
        });
        queue.wait(&waiter);
        assert!(queue.wake_specific(&waiter));
    }
}
