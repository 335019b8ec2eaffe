//! Deferred work.
//!
//! A thread can never release its own stack while running on it, and death
//! notifications must not run inside interrupt context. Both are handed to
//! the platform's worker facility instead.

use alloc::boxed::Box;

/// A unit of work queued for asynchronous execution.
pub type Work = Box<dyn FnOnce() + Send>;

pub trait DeferredWork: Send + Sync {
    /// Queue `work` to run later, on a stack other than the caller's.
    ///
    /// Must be callable from interrupt context and with spinlocks held.
    fn schedule_work(&self, work: Work);
}
