//! The global list of scheduler-managed threads.
//!
//! A thread enters the registry when the scheduler starts managing it and
//! leaves it only when it dies. Idle threads are never registered.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::{ExecutionState, ThreadId, ThreadRef};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

pub struct Registry {
    threads: Mutex<Vec<ThreadRef>>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Lock the registry with room reserved for one more entry, so that the
    /// following insertion cannot fail.
    pub(crate) fn lock_for_insert(&self) -> ThreadResult<MutexGuard<'_, Vec<ThreadRef>>> {
        let mut threads = self.threads.lock();
        threads
            .try_reserve(1)
            .map_err(|_| ThreadError::TemporaryOutage)?;
        Ok(threads)
    }

    /// Must not be called with a thread lock held.
    pub(crate) fn remove(&self, thread: &ThreadRef) -> bool {
        let mut threads = self.threads.lock();
        match threads.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(index) => {
                threads.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, thread: &ThreadRef) -> bool {
        self.threads.lock().iter().any(|t| Arc::ptr_eq(t, thread))
    }

    /// Look up a managed thread by id.
    ///
    /// The returned handle is cloned under the registry lock, so the thread
    /// stays alive for as long as the caller holds it, even if it dies.
    pub fn find(&self, id: ThreadId) -> Option<ThreadRef> {
        if !id.is_valid() {
            return None;
        }
        self.threads.lock().iter().find(|t| t.id() == id).cloned()
    }

    /// Call `iterator` on every managed thread until it returns `false`.
    ///
    /// Fully suspended threads are skipped unless `include_suspended` is set.
    /// Neither the registry lock nor any thread lock is held while
    /// `iterator` runs, so it may call back into the lifecycle API. Returns
    /// `false` if the iteration was cut short.
    pub fn foreach<F>(&self, include_suspended: bool, mut iterator: F) -> bool
    where
        F: FnMut(&ThreadRef) -> bool,
    {
        let threads = self.threads.lock().clone();
        for thread in &threads {
            if !include_suspended && thread.execution_state() == ExecutionState::Suspended {
                continue;
            }
            if !iterator(thread) {
                return false;
            }
        }
        true
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
