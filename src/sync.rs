//! Blocking primitives used when a caller waits for a transition.

use alloc::sync::Arc;
use portable_atomic::{AtomicBool, Ordering};

/// The platform's parking facility.
///
/// A kernel implements this by halting the waiting CPU (or descheduling the
/// waiting thread) until [`Parker::unpark_all`] is invoked; the default
/// implementation spins.
pub trait Parker: Send + Sync {
    /// Block the caller until `flag` reads `true`.
    ///
    /// Must re-check `flag` after every wake-up, and must not miss a wake-up
    /// that happens between the check and the block.
    fn park_until(&self, flag: &AtomicBool) {
        while !flag.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    /// Wake every parked caller so that it re-checks its flag.
    fn unpark_all(&self) {}
}

/// A one-shot completion flag.
///
/// The waiting side must register whatever will call [`Completion::complete`]
/// before releasing the lock that protects the awaited state; otherwise the
/// completion can be missed.
#[derive(Debug, Default)]
pub struct Completion {
    done: AtomicBool,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
        })
    }

    pub fn complete(&self, parker: &dyn Parker) {
        self.done.store(true, Ordering::Release);
        parker.unpark_all();
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn wait(&self, parker: &dyn Parker) {
        parker.park_until(&self.done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SpinParker;

    impl Parker for SpinParker {}

    #[test]
    fn test_completion_already_done() {
        let completion = Completion::new();
        assert!(!completion.is_complete());
        completion.complete(&SpinParker);
        // returns immediately
        completion.wait(&SpinParker);
        assert!(completion.is_complete());
    }
}
