//! Scheduler configuration.

use crate::error::{ThreadError, ThreadResult};
use crate::thread::stack::MIN_STACK_SIZE;
use crate::time::DEFAULT_QUANTUM_NS;

/// Stack size for threads built without an explicit size.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Stack size of the per-CPU idle threads.
pub const DEFAULT_IDLE_STACK_SIZE: usize = 16 * 1024;

/// Tunables fixed when the [`crate::Kernel`] is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of a scheduling quantum, in nanoseconds
    pub quantum_ns: u64,
    /// Stack size for each CPU's idle thread
    pub idle_stack_size: usize,
    /// Stack size handed to [`crate::ThreadBuilder`] by [`crate::Kernel::spawn`]
    pub default_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_ns: DEFAULT_QUANTUM_NS,
            idle_stack_size: DEFAULT_IDLE_STACK_SIZE,
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn with_quantum_ns(mut self, quantum_ns: u64) -> Self {
        self.quantum_ns = quantum_ns;
        self
    }

    pub fn with_idle_stack_size(mut self, size: usize) -> Self {
        self.idle_stack_size = size;
        self
    }

    pub fn with_default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    pub fn validate(&self) -> ThreadResult<()> {
        if self.quantum_ns == 0 {
            return Err(ThreadError::InvalidArgument);
        }
        if self.idle_stack_size < MIN_STACK_SIZE || self.default_stack_size < MIN_STACK_SIZE {
            return Err(ThreadError::InvalidArgument);
        }
        Ok(())
    }
}
