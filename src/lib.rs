#![no_std]

//! An SMP preemptive round-robin scheduler and the thread lifecycle state
//! machine that drives it, for monolithic kernels.
//!
//! The embedding kernel supplies a [`Platform`] (CPU topology and context
//! switching, one-shot timers, deferred work, parking), builds a [`Kernel`],
//! starts every CPU, and routes its trap path through
//! [`Kernel::interrupt_start`] and [`Kernel::interrupt_end`].

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arch;
pub mod config;
pub mod error;
pub mod hooks;
pub mod kernel;
mod lifecycle;
mod preemption;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod sync;
pub mod thread;
pub mod time;
pub mod waitq;
pub mod workers;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(test)]
mod tests;

pub use arch::{Arch, CpuId};
pub use config::SchedulerConfig;
pub use error::{ThreadError, ThreadResult, Transition};
pub use hooks::{HookOwnerId, HookResult, ThreadHook};
pub use kernel::{Kernel, Platform};
pub use queue::QueueId;
pub use stats::StatsSnapshot;
pub use sync::{Completion, Parker};
pub use thread::{ExecutionState, Thread, ThreadBuilder, ThreadFlags, ThreadId, ThreadLock, ThreadRef};
pub use time::{Timeout, TimeoutKind, TimerService};
pub use waitq::{WaitQueue, Waiter};
pub use workers::DeferredWork;
