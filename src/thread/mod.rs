//! Thread control blocks.
//!
//! A [`Thread`] is shared through [`ThreadRef`] (an `Arc`). The scheduler's
//! run queues, the global registry, pending death notifications, and any
//! external holder each own an independent reference; the control block is
//! freed when the last one goes away.

use crate::error::{ThreadError, ThreadResult};
use crate::hooks::{HookOwnerId, HookTable, ThreadHook};
use crate::queue::{QueueId, QueueLink};
use crate::time::{TimerId, Timeout};
use crate::waitq::{WaitQueue, Waiter};
use alloc::boxed::Box;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use core::ops::{Deref, DerefMut};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

pub mod builder;
pub mod stack;

pub use builder::ThreadBuilder;
pub use stack::Stack;

/// Shared handle to a thread control block.
pub type ThreadRef = Arc<Thread>;

/// The first code a thread runs.
pub type ThreadEntry = Box<dyn FnOnce() + Send>;

/// Unique identifier for threads.
///
/// Identifiers are handed out by the scheduler when it starts managing a
/// thread. They are only reused after the 64-bit generation counter wraps,
/// and [`ThreadId::INVALID`] is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Reserved sentinel carried by threads that are not managed yet.
    pub const INVALID: ThreadId = ThreadId(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    /// Runnable, waiting in a run queue for its turn
    NotRunning = 0,
    /// Must not run again until it is resumed
    Suspended = 1,
    /// Currently running on some CPU
    Running = 2,
    /// Must never run again
    Dead = 3,
    /// Was running when the current interrupt on its CPU occurred
    Interrupted = 4,
}

impl ExecutionState {
    /// Whether the thread is on a CPU right now.
    pub fn is_executing(self) -> bool {
        matches!(self, ExecutionState::Running | ExecutionState::Interrupted)
    }
}

bitflags! {
    /// Orthogonal state bits, protected by the thread lock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u32 {
        /// A suspension was requested while the thread was executing
        const PENDING_SUSPEND = 1 << 0;
        /// A kill was requested while the thread was executing
        const PENDING_DEATH = 1 << 1;
        /// A block was requested while the thread was executing
        const PENDING_BLOCK = 1 << 2;
        /// Set by signal delivery; the thread should leave kernel space soon
        const INTERRUPTED = 1 << 3;
        /// Lifecycle code is inside the critical section of the thread's wait queue
        const HOLDING_WAITQ_LOCK = 1 << 4;
        /// The scheduler must not pick the thread
        const BLOCKED = 1 << 5;
        /// Death waiters have been notified
        const DEATH_NOTIFIED = 1 << 6;
        /// A CPU's idle thread; rejected by the lifecycle API
        const IDLE = 1 << 7;

        const PENDING_TRANSITIONS = Self::PENDING_SUSPEND.bits()
            | Self::PENDING_DEATH.bits()
            | Self::PENDING_BLOCK.bits();
    }
}

/// Everything protected by the thread lock.
pub struct ThreadState {
    pub(crate) execution: ExecutionState,
    pub(crate) flags: ThreadFlags,
    pub(crate) block_count: u64,
    /// The wait queue the thread is registered on while (about to be) suspended.
    pub(crate) waitq: Option<Arc<WaitQueue>>,
    /// Resumes the thread when its wait queue wakes it. Installed by the manager.
    pub(crate) wait_link: Option<Arc<Waiter>>,
    /// Armed once the thread is fully suspended.
    pub(crate) pending_timeout: Option<Timeout>,
    pub(crate) timer: Option<TimerId>,
    /// Bumped whenever a timeout is armed or dropped; stale firings compare unequal.
    pub(crate) timeout_seq: u64,
    pub(crate) hooks: HookTable,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            execution: ExecutionState::Suspended,
            flags: ThreadFlags::empty(),
            block_count: 0,
            waitq: None,
            wait_link: None,
            pending_timeout: None,
            timer: None,
            timeout_seq: 0,
            hooks: HookTable::new(),
        }
    }

    pub fn execution(&self) -> ExecutionState {
        self.execution
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn is_dead_or_dying(&self) -> bool {
        self.execution == ExecutionState::Dead || self.flags.contains(ThreadFlags::PENDING_DEATH)
    }

    pub fn is_suspended_or_suspending(&self) -> bool {
        self.execution == ExecutionState::Suspended || self.flags.contains(ThreadFlags::PENDING_SUSPEND)
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn waitq(&self) -> Option<&Arc<WaitQueue>> {
        self.waitq.as_ref()
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }
}

/// Thread control block.
pub struct Thread {
    id: AtomicU64,
    name: Option<&'static str>,
    state: Mutex<ThreadState>,
    /// Owned by whichever queue the thread is on; see [`crate::queue`].
    pub(crate) link: Mutex<QueueLink>,
    /// Lock-free mirror of [`ThreadFlags::BLOCKED`] for the quantum path.
    blocked: AtomicBool,
    stack: Mutex<Option<Stack>>,
    entry: Mutex<Option<ThreadEntry>>,
    /// Woken once the thread is fully suspended.
    pub suspend_wait: WaitQueue,
    /// Woken once the thread is fully blocked.
    pub block_wait: WaitQueue,
    /// Woken from a worker after the thread died; the handle can still be used.
    pub death_wait: WaitQueue,
}

impl Thread {
    pub(crate) fn new(name: Option<&'static str>, stack: Option<Stack>, entry: ThreadEntry) -> ThreadRef {
        Arc::new(Thread {
            id: AtomicU64::new(ThreadId::INVALID.get()),
            name,
            state: Mutex::new(ThreadState::new()),
            link: Mutex::new(QueueLink::default()),
            blocked: AtomicBool::new(false),
            stack: Mutex::new(stack),
            entry: Mutex::new(Some(entry)),
            suspend_wait: WaitQueue::new(),
            block_wait: WaitQueue::new(),
            death_wait: WaitQueue::new(),
        })
    }

    pub fn id(&self) -> ThreadId {
        ThreadId(self.id.load(Ordering::Acquire))
    }

    pub(crate) fn assign_id(&self, id: ThreadId) {
        self.id.store(id.get(), Ordering::Release);
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn lock(&self) -> ThreadLock<'_> {
        ThreadLock {
            thread: self,
            guard: Some(self.state.lock()),
        }
    }

    pub fn try_lock(&self) -> Option<ThreadLock<'_>> {
        self.state.try_lock().map(|guard| ThreadLock {
            thread: self,
            guard: Some(guard),
        })
    }

    /// The thread's execution state at the time of the call.
    ///
    /// Only [`ExecutionState::Dead`] is guaranteed to still hold on return.
    pub fn execution_state(&self) -> ExecutionState {
        self.lock().execution
    }

    /// Whether some manager has claimed this thread.
    pub fn is_managed(&self) -> bool {
        !self.lock().hooks.is_empty()
    }

    /// The queue this thread is linked into, if any.
    pub fn queue(&self) -> Option<QueueId> {
        self.link.lock().queue
    }

    pub fn is_queued(&self) -> bool {
        self.link.lock().is_linked()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    pub(crate) fn set_blocked(&self, state: &mut ThreadState, blocked: bool) {
        state.flags.set(ThreadFlags::BLOCKED, blocked);
        self.blocked.store(blocked, Ordering::Release);
    }

    pub fn mark_interrupted(&self) {
        self.lock().flags.insert(ThreadFlags::INTERRUPTED);
    }

    pub fn unmark_interrupted(&self) {
        self.lock().flags.remove(ThreadFlags::INTERRUPTED);
    }

    pub fn marked_interrupted(&self) -> bool {
        self.lock().flags.contains(ThreadFlags::INTERRUPTED)
    }

    /// Install `hook` in the first free slot.
    pub fn register_hook(&self, owner: HookOwnerId, hook: Arc<dyn ThreadHook>) -> ThreadResult<usize> {
        self.lock().hooks.register(owner, hook)
    }

    pub fn find_hook(&self, owner: HookOwnerId) -> Option<usize> {
        self.lock().hooks.find(owner)
    }

    /// Number of live references to the control block.
    pub fn ref_count(this: &ThreadRef) -> usize {
        Arc::strong_count(this)
    }

    /// Hand the entry point to the architecture code that starts the thread.
    pub fn take_entry(&self) -> Option<ThreadEntry> {
        self.entry.lock().take()
    }

    pub fn has_stack(&self) -> bool {
        self.stack.lock().is_some()
    }

    /// Initial stack pointer for architecture code.
    pub fn stack_top(&self) -> Option<usize> {
        self.stack.lock().as_ref().map(Stack::top)
    }

    /// Release the stack. Only called from deferred work, never on the stack itself.
    pub(crate) fn release_stack(&self) -> Option<Stack> {
        self.stack.lock().take()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A held thread lock that can be temporarily released.
///
/// Hooks receive this so they can drop the lock around calls that must not
/// run with it held (forcing a preemption of the thread, arming timers, or
/// touching the global registry) and pick it back up afterwards.
pub struct ThreadLock<'a> {
    thread: &'a Thread,
    guard: Option<MutexGuard<'a, ThreadState>>,
}

impl<'a> ThreadLock<'a> {
    pub fn thread(&self) -> &'a Thread {
        self.thread
    }

    /// Run `f` with the lock released, then reacquire it.
    ///
    /// Anything read before the call may have changed when it returns.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        drop(self.guard.take());
        let result = f();
        self.guard = Some(self.thread.state.lock());
        result
    }
}

impl Deref for ThreadLock<'_> {
    type Target = ThreadState;

    fn deref(&self) -> &ThreadState {
        match self.guard.as_deref() {
            Some(state) => state,
            None => unreachable!("thread lock accessed while released"),
        }
    }
}

impl DerefMut for ThreadLock<'_> {
    fn deref_mut(&mut self) -> &mut ThreadState {
        match self.guard.as_deref_mut() {
            Some(state) => state,
            None => unreachable!("thread lock accessed while released"),
        }
    }
}

/// Reject operations on threads that no manager has claimed.
pub(crate) fn ensure_managed(state: &ThreadState) -> ThreadResult<()> {
    if state.hooks.is_empty() {
        Err(ThreadError::InvalidArgument)
    } else {
        Ok(())
    }
}
