use crate::arch::CpuId;
use crate::hooks::{HookResult, ThreadHook};
use crate::kernel::{Kernel, Platform};
use crate::queue::{QueueId, QueueState};
use crate::thread::{ExecutionState, ThreadFlags, ThreadLock, ThreadRef};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use log::{debug, trace};
use spin::MutexGuard;

/// The scheduler's own entry in every managed thread's hook table.
///
/// It owns thread placement: which queue a thread is on, when it runs, and
/// when a requested transition actually takes effect.
pub struct SchedulerHook<P: Platform> {
    kernel: Weak<Kernel<P>>,
}

impl<P: Platform> SchedulerHook<P> {
    pub(crate) fn new(kernel: Weak<Kernel<P>>) -> Self {
        Self { kernel }
    }
}

impl<P: Platform> ThreadHook for SchedulerHook<P> {
    fn suspend(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.manager_suspend(thread, lock),
            None => HookResult::NotApplicable,
        }
    }

    fn resume(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.manager_resume(thread, lock),
            None => HookResult::NotApplicable,
        }
    }

    fn kill(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.manager_kill(thread, lock),
            None => HookResult::NotApplicable,
        }
    }

    fn block(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.manager_block(thread, lock),
            None => HookResult::NotApplicable,
        }
    }

    fn unblock(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        thread.set_blocked(lock, false);
        thread.block_wait.wake_all();
        HookResult::Handled
    }

    fn interrupted(&self, thread: &ThreadRef) -> HookResult {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.manager_interrupted(thread),
            None => HookResult::NotApplicable,
        }
    }

    fn ending_interrupt(&self, thread: &ThreadRef) -> HookResult {
        let mut lock = thread.lock();
        if lock.execution == ExecutionState::Interrupted {
            lock.execution = ExecutionState::Running;
        }
        HookResult::Handled
    }
}

impl<P: Platform> Kernel<P> {
    fn manager_kill(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        if lock.execution.is_executing() {
            return self.preempt_executing(thread, lock, ThreadFlags::PENDING_DEATH);
        }
        self.kill_now(thread, lock);
        HookResult::Handled
    }

    fn manager_suspend(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        if lock.execution.is_executing() {
            return self.preempt_executing(thread, lock, ThreadFlags::PENDING_SUSPEND);
        }
        self.suspend_now(thread, lock);
        HookResult::Handled
    }

    fn manager_block(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        if lock.execution.is_executing() {
            return self.preempt_executing(thread, lock, ThreadFlags::PENDING_BLOCK);
        }
        self.block_now(thread, lock);
        HookResult::Handled
    }

    fn manager_resume(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        self.detach_waitq(lock);
        self.cancel_timeout(lock);

        if lock.execution != ExecutionState::Suspended {
            // only a pending suspension, which the caller already cleared
            thread.suspend_wait.wake_all();
            return HookResult::Handled;
        }

        self.suspended.lock().remove(thread);
        lock.execution = ExecutionState::NotRunning;
        let (cpu, mut queue) = self.find_least_loaded();
        queue.push_back(thread);
        drop(queue);

        debug!("thread {} resumed on cpu {}", thread.id(), cpu);
        HookResult::Handled
    }

    /// Interrupt entry on the thread executing on this CPU.
    ///
    /// This is the only place where a transition requested against an
    /// executing thread is completed.
    fn manager_interrupted(&self, thread: &ThreadRef) -> HookResult {
        let cpu = self.platform.current_cpu();
        let per_cpu = self.cpu(cpu);
        let mut lock = thread.lock();

        if lock.flags.contains(ThreadFlags::IDLE) || !lock.flags.intersects(ThreadFlags::PENDING_TRANSITIONS) {
            lock.execution = ExecutionState::Interrupted;
            drop(lock);
            self.arm_timer(cpu);
            return HookResult::Handled;
        }

        let dying = lock.flags.contains(ThreadFlags::PENDING_DEATH);
        {
            let mut queue = per_cpu.queue.lock();
            let next = if queue.len() > 1 && queue.contains(thread) {
                let start = queue.next_after(thread);
                queue.find_from(&start, |t| !Arc::ptr_eq(t, thread) && !t.is_blocked())
            } else {
                None
            };
            let next_lock = next.as_ref().and_then(|next| next.try_lock());
            let (target, mut target_lock) = match (next.as_ref(), next_lock) {
                (Some(next), Some(next_lock)) => (next, next_lock),
                _ => (&per_cpu.idle, per_cpu.idle.lock()),
            };

            if !Arc::ptr_eq(target, &per_cpu.idle) {
                queue.rotate_to(target);
            }
            target_lock.execution = ExecutionState::Interrupted;
            lock.execution = ExecutionState::NotRunning;
            let old = if dying { None } else { Some(thread) };
            self.switch_to(cpu, old, target);
        }

        self.apply_pending(thread, &mut lock);
        drop(lock);
        self.arm_timer(cpu);
        HookResult::Handled
    }

    /// Force the CPU executing `thread` into the interrupt path, where the
    /// `pending` transition is applied.
    fn preempt_executing(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>, pending: ThreadFlags) -> HookResult {
        let cpu = match thread.queue() {
            Some(QueueId::Cpu(cpu)) => cpu,
            other => panic!("executing thread {} is on queue {:?}", thread.id(), other),
        };
        trace!("cpu {}: preempting thread {}", cpu, thread.id());
        lock.unlocked(|| {
            self.disarm_timer(cpu);
            self.cpu(cpu).stats.record_preemption_request();
            self.platform.request_preemption(cpu);
        });

        if lock.flags.contains(pending) {
            HookResult::HandledAsync
        } else {
            HookResult::Handled
        }
    }

    /// Complete whatever transitions are pending on a thread that just left
    /// its CPU.
    pub(crate) fn apply_pending(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        if lock.flags.contains(ThreadFlags::PENDING_DEATH) {
            self.kill_now(thread, lock);
            return;
        }
        if lock.flags.contains(ThreadFlags::PENDING_BLOCK) {
            self.block_now(thread, lock);
        }
        if lock.flags.contains(ThreadFlags::PENDING_SUSPEND) {
            self.suspend_now(thread, lock);
        }
    }

    fn unlink(&self, thread: &ThreadRef) {
        match thread.queue() {
            Some(QueueId::Cpu(cpu)) => self.cpu(cpu).queue.lock().remove(thread),
            Some(QueueId::Suspended) => self.suspended.lock().remove(thread),
            None => {}
        }
    }

    fn kill_now(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        lock.execution = ExecutionState::Dead;
        lock.flags.remove(ThreadFlags::PENDING_TRANSITIONS);
        thread.set_blocked(lock, false);
        self.unlink(thread);
        self.died(thread, lock);
    }

    fn suspend_now(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        match thread.queue() {
            Some(QueueId::Cpu(cpu)) => self.cpu(cpu).queue.lock().remove(thread),
            other => panic!("runnable thread {} is on queue {:?}", thread.id(), other),
        }
        lock.execution = ExecutionState::Suspended;
        lock.flags.remove(ThreadFlags::PENDING_SUSPEND);
        self.suspended.lock().push_back(thread);

        debug!("thread {} suspended", thread.id());
        self.arm_timeout(thread, lock);
        thread.suspend_wait.wake_all();
    }

    fn block_now(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        lock.flags.remove(ThreadFlags::PENDING_BLOCK);
        thread.set_blocked(lock, true);
        debug!("thread {} blocked", thread.id());
        thread.block_wait.wake_all();
    }

    /// Tear down a thread that just became Dead.
    ///
    /// The stack and the last scheduler-held reference are released by a
    /// deferred task, never on the dying thread's own stack.
    fn died(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) {
        self.detach_waitq(lock);
        self.cancel_timeout(lock);
        debug_assert!(!lock.flags.contains(ThreadFlags::HOLDING_WAITQ_LOCK));

        // nobody waiting for these can expect them to complete anymore
        thread.suspend_wait.wake_all();
        thread.block_wait.wake_all();

        lock.unlocked(|| {
            self.registry.remove(thread);
        });
        debug!("thread {} died", thread.id());

        let thread = thread.clone();
        self.platform.schedule_work(Box::new(move || {
            drop(thread.release_stack());
            drop(thread.take_entry());
            thread.lock().flags.insert(ThreadFlags::DEATH_NOTIFIED);
            thread.death_wait.wake_all();
        }));
    }

    /// Pick the active CPU with the shortest run queue, ties going to the
    /// lowest CPU index.
    ///
    /// At most one queue lock is held at any time; the winner is returned
    /// with its lock held.
    pub(crate) fn find_least_loaded(&self) -> (CpuId, MutexGuard<'_, QueueState>) {
        let mut best: Option<(CpuId, usize)> = None;
        for (cpu, per_cpu) in self.cpus.iter().enumerate() {
            let queue = per_cpu.queue.lock();
            if !queue.active {
                continue;
            }
            if best.map_or(true, |(_, count)| queue.len() < count) {
                best = Some((cpu, queue.len()));
            }
        }

        match best {
            Some((cpu, _)) => (cpu, self.cpu(cpu).queue.lock()),
            None => panic!("no active cpu to place a thread on"),
        }
    }
}
