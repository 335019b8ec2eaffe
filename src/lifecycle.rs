//! Thread lifecycle API.
//!
//! Each entry point validates the request under the thread lock, records the
//! pending transition and offers it to every hook installed on the thread.
//! A request against a thread that is executing somewhere completes
//! asynchronously; the caller learns this through [`Transition::Pending`].
//!
//! All of these may be called from any CPU. None of them may be called with
//! the target's thread lock held.

use crate::error::{ThreadError, ThreadResult, Transition};
use crate::hooks::{self, HookEvent};
use crate::kernel::{Kernel, Platform};
use crate::sync::Completion;
use crate::thread::{ensure_managed, ExecutionState, ThreadFlags, ThreadLock, ThreadRef, ThreadState};
use crate::time::Timeout;
use crate::waitq::{WaitQueue, Waiter};
use alloc::boxed::Box;
use alloc::sync::Arc;
use log::{debug, trace, warn};

fn ensure_controllable(state: &ThreadState) -> ThreadResult<()> {
    ensure_managed(state)?;
    if state.flags().contains(ThreadFlags::IDLE) {
        return Err(ThreadError::InvalidArgument);
    }
    Ok(())
}

impl<P: Platform> Kernel<P> {
    /// Suspend `thread`.
    ///
    /// With `wait` set, a pending suspension parks the caller until it
    /// completes (or is cancelled by a resume or a kill). A thread cannot
    /// wait for its own suspension this way.
    pub fn suspend(&self, thread: &ThreadRef, wait: bool) -> ThreadResult<Transition> {
        self.suspend_with(thread, wait, None, None)
    }

    /// Suspend `thread` and resume it automatically once `timeout` expires.
    ///
    /// The timer only starts once the thread is fully suspended. A zero
    /// timeout value means no timeout.
    pub fn suspend_timeout(&self, thread: &ThreadRef, wait: bool, timeout: Timeout) -> ThreadResult<Transition> {
        self.suspend_with(thread, wait, Some(timeout), None)
    }

    /// Suspend `thread` until `waitq` wakes it.
    ///
    /// The thread is registered on `waitq` immediately, so a wake-up that
    /// arrives before the suspension completes cancels the suspension.
    /// Wake-ups can be spurious: resuming the thread for any other reason
    /// also takes it off `waitq`.
    pub fn wait(&self, thread: &ThreadRef, waitq: &Arc<WaitQueue>) -> ThreadResult<Transition> {
        self.suspend_with(thread, false, None, Some(waitq))
    }

    /// Like [`Kernel::wait`], resuming the thread once `timeout` expires if
    /// nothing wakes it first.
    pub fn wait_timeout(&self, thread: &ThreadRef, waitq: &Arc<WaitQueue>, timeout: Timeout) -> ThreadResult<Transition> {
        self.suspend_with(thread, false, Some(timeout), Some(waitq))
    }

    fn suspend_with(
        &self,
        thread: &ThreadRef,
        wait: bool,
        timeout: Option<Timeout>,
        waitq: Option<&Arc<WaitQueue>>,
    ) -> ThreadResult<Transition> {
        let mut lock = thread.lock();
        ensure_controllable(&lock)?;
        if lock.is_dead_or_dying() {
            return Err(ThreadError::ThreadDead);
        }
        if lock.is_suspended_or_suspending() {
            return Err(ThreadError::AlreadyInProgress);
        }

        if let Some(timeout) = timeout {
            set_timeout(&mut lock, timeout);
        }
        if let Some(waitq) = waitq {
            self.attach_waitq(thread, &mut lock, waitq);
        }

        lock.flags.insert(ThreadFlags::PENDING_SUSPEND);
        debug!("suspending thread {}", thread.id());
        let transition = hooks::dispatch(thread, &mut lock, HookEvent::Suspend);
        if wait && transition.is_pending() {
            self.wait_on(&thread.suspend_wait, lock);
        }
        Ok(transition)
    }

    /// Resume a suspended thread, or cancel a pending suspension.
    pub fn resume(&self, thread: &ThreadRef) -> ThreadResult<Transition> {
        let mut lock = thread.lock();
        self.resume_locked(thread, &mut lock)
    }

    pub(crate) fn resume_locked(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> ThreadResult<Transition> {
        ensure_controllable(lock)?;
        if lock.is_dead_or_dying() {
            return Err(ThreadError::ThreadDead);
        }
        if lock.execution != ExecutionState::Suspended && !lock.flags.contains(ThreadFlags::PENDING_SUSPEND) {
            return Err(ThreadError::AlreadyInProgress);
        }

        lock.flags.remove(ThreadFlags::PENDING_SUSPEND);
        debug!("resuming thread {}", thread.id());
        Ok(hooks::dispatch(thread, lock, HookEvent::Resume))
    }

    /// Kill `thread`.
    ///
    /// A thread that is not executing dies before this returns. An
    /// executing thread is preempted and dies at its next interrupt.
    pub fn kill(&self, thread: &ThreadRef) -> ThreadResult<Transition> {
        let mut lock = thread.lock();
        ensure_controllable(&lock)?;
        if lock.is_dead_or_dying() {
            return Err(ThreadError::AlreadyInProgress);
        }

        lock.flags.insert(ThreadFlags::PENDING_DEATH);
        debug!("killing thread {}", thread.id());
        Ok(hooks::dispatch(thread, &mut lock, HookEvent::Kill))
    }

    /// Keep the scheduler from picking `thread` until a matching
    /// [`Kernel::unblock`].
    ///
    /// Blocks nest. A blocked thread keeps its place in its run queue.
    pub fn block(&self, thread: &ThreadRef, wait: bool) -> ThreadResult<Transition> {
        let mut lock = thread.lock();
        ensure_controllable(&lock)?;
        if lock.is_dead_or_dying() {
            return Err(ThreadError::ThreadDead);
        }

        lock.block_count = lock.block_count.checked_add(1).ok_or(ThreadError::InvalidArgument)?;
        let transition = if lock.block_count > 1 {
            if lock.flags.contains(ThreadFlags::PENDING_BLOCK) {
                Transition::Pending
            } else {
                Transition::Completed
            }
        } else {
            lock.flags.insert(ThreadFlags::PENDING_BLOCK);
            debug!("blocking thread {}", thread.id());
            hooks::dispatch(thread, &mut lock, HookEvent::Block)
        };

        if wait && transition.is_pending() {
            self.wait_on(&thread.block_wait, lock);
        }
        Ok(transition)
    }

    pub fn unblock(&self, thread: &ThreadRef) -> ThreadResult<Transition> {
        let mut lock = thread.lock();
        ensure_controllable(&lock)?;
        if lock.execution == ExecutionState::Dead {
            return Err(ThreadError::ThreadDead);
        }
        if lock.block_count == 0 {
            return Err(ThreadError::AlreadyInProgress);
        }

        lock.block_count -= 1;
        if lock.block_count > 0 {
            return Ok(Transition::Completed);
        }
        lock.flags.remove(ThreadFlags::PENDING_BLOCK);
        debug!("unblocking thread {}", thread.id());
        Ok(hooks::dispatch(thread, &mut lock, HookEvent::Unblock))
    }

    /// Kill the calling thread. It stops at the next interrupt on this CPU.
    pub fn kill_current(&self) -> ThreadResult<Transition> {
        let thread = self.current_thread().ok_or(ThreadError::InvalidArgument)?;
        self.kill(&thread)
    }

    /// Suspend the calling thread. It stops at the next interrupt on this CPU.
    pub fn suspend_current(&self) -> ThreadResult<Transition> {
        let thread = self.current_thread().ok_or(ThreadError::InvalidArgument)?;
        self.suspend(&thread, false)
    }

    /// Register a completion on `queue`, release `lock` and park until the
    /// completion fires.
    fn wait_on(&self, queue: &WaitQueue, lock: ThreadLock<'_>) {
        let done = Completion::new();
        queue.wait(&self.completion_waiter(&done));
        drop(lock);
        done.wait(&self.platform);
    }

    fn attach_waitq(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>, waitq: &Arc<WaitQueue>) {
        self.detach_waitq(lock);
        let link = lock
            .wait_link
            .clone()
            .unwrap_or_else(|| self.wake_link(thread));
        lock.wait_link = Some(link.clone());

        lock.flags.insert(ThreadFlags::HOLDING_WAITQ_LOCK);
        waitq.lock().add(&link);
        lock.flags.remove(ThreadFlags::HOLDING_WAITQ_LOCK);
        lock.waitq = Some(waitq.clone());
    }

    pub(crate) fn detach_waitq(&self, lock: &mut ThreadLock<'_>) {
        let Some(waitq) = lock.waitq.take() else {
            return;
        };
        if let Some(link) = lock.wait_link.clone() {
            lock.flags.insert(ThreadFlags::HOLDING_WAITQ_LOCK);
            waitq.lock().remove(&link);
            lock.flags.remove(ThreadFlags::HOLDING_WAITQ_LOCK);
        }
    }

    fn wake_link(&self, thread: &ThreadRef) -> Arc<Waiter> {
        let this = self.this.clone();
        let thread = Arc::downgrade(thread);
        Waiter::new(move || {
            if let (Some(kernel), Some(thread)) = (this.upgrade(), thread.upgrade()) {
                kernel.waitq_woke(&thread);
            }
        })
    }

    /// The wait queue `thread` was registered on woke it.
    fn waitq_woke(&self, thread: &ThreadRef) {
        let mut lock = thread.lock();
        let still_registered = match (&lock.waitq, &lock.wait_link) {
            (Some(waitq), Some(link)) => waitq.lock().contains(link),
            // detached by a resume that beat the wake-up
            _ => return,
        };
        if still_registered {
            // woken from a queue the thread has since left
            return;
        }

        lock.waitq = None;
        if lock.is_suspended_or_suspending() && !lock.is_dead_or_dying() {
            if let Err(err) = self.resume_locked(thread, &mut lock) {
                warn!("failed to resume thread {} after wake-up: {}", thread.id(), err);
            }
        }
    }

    /// Drop any pending or armed timeout.
    pub(crate) fn cancel_timeout(&self, lock: &mut ThreadLock<'_>) {
        lock.pending_timeout = None;
        lock.timeout_seq = lock.timeout_seq.wrapping_add(1);
        if let Some(id) = lock.timer.take() {
            if let Err(err) = self.platform.cancel(id) {
                trace!("timeout timer {:?} already gone: {}", id, err);
            }
        }
    }

    /// Start the pending timeout of a thread that just became fully
    /// suspended.
    pub(crate) fn arm_timeout(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        let Some(timeout) = lock.pending_timeout.take() else {
            return;
        };
        let seq = lock.timeout_seq;
        let delay = timeout.delay_from(self.platform.now_ns());

        let this = self.this.clone();
        let weak = Arc::downgrade(thread);
        let callback = Box::new(move || {
            if let (Some(kernel), Some(thread)) = (this.upgrade(), weak.upgrade()) {
                kernel.timeout_fired(&thread, seq);
            }
        });

        match lock.unlocked(|| self.platform.schedule_oneshot(delay, callback)) {
            Ok(id) => {
                let still_wanted = lock.timeout_seq == seq
                    && lock.execution == ExecutionState::Suspended
                    && lock.timer.is_none();
                if still_wanted {
                    lock.timer = Some(id);
                } else if self.platform.cancel(id).is_err() {
                    trace!("stale timeout timer {:?} already fired", id);
                }
            }
            Err(err) => warn!("failed to arm timeout for thread {}: {}", thread.id(), err),
        }
    }

    fn timeout_fired(&self, thread: &ThreadRef, seq: u64) {
        let mut lock = thread.lock();
        if lock.timeout_seq != seq {
            trace!("ignoring stale timeout for thread {}", thread.id());
            return;
        }
        lock.timer = None;
        if lock.execution != ExecutionState::Suspended {
            return;
        }
        if let Err(err) = self.resume_locked(thread, &mut lock) {
            warn!("failed to resume thread {} on timeout: {}", thread.id(), err);
        }
    }
}

/// Replace the pending timeout. A zero value clears it.
fn set_timeout(lock: &mut ThreadLock<'_>, timeout: Timeout) {
    lock.timeout_seq = lock.timeout_seq.wrapping_add(1);
    lock.pending_timeout = if timeout.is_disabled() { None } else { Some(timeout) };
}
