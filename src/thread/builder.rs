//! Thread builder for configuring thread creation.

use super::{Stack, Thread, ThreadRef};
use crate::config::DEFAULT_STACK_SIZE;
use crate::error::ThreadResult;
use alloc::boxed::Box;

/// Builder for configuring and creating new threads.
///
/// Threads come out Suspended, unlinked from any queue, without hooks and
/// with a single reference: the returned handle. Hand them to
/// [`crate::Kernel::manage`] to make them schedulable.
pub struct ThreadBuilder {
    stack_size: usize,
    name: Option<&'static str>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            name: None,
        }
    }

    /// Set the stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Set the thread name for debugging purposes.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Allocate the stack and control block.
    ///
    /// Fails with [`crate::ThreadError::TemporaryOutage`] if the stack cannot
    /// be allocated.
    pub fn spawn<F>(self, entry: F) -> ThreadResult<ThreadRef>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = Stack::allocate(self.stack_size)?;
        Ok(Thread::new(self.name, Some(stack), Box::new(entry)))
    }

    /// Build a control block for a thread that already runs on a stack it
    /// does not own, such as the boot thread of a CPU.
    pub fn adopt(self) -> ThreadRef {
        Thread::new(self.name, None, Box::new(|| {}))
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
