//! Kernel abstraction for managing the threading system.
//!
//! This module provides the main `Kernel` struct that owns every piece of
//! scheduler state (per-CPU run queues, the suspended queue, the registry
//! and the id generator) and eliminates global singleton state.

use crate::arch::{Arch, CpuId};
use crate::config::SchedulerConfig;
use crate::error::{ThreadError, ThreadResult};
use crate::hooks::{self, HookEvent, HookOwnerId, ThreadHook};
use crate::queue::{QueueId, QueueState};
use crate::registry::Registry;
use crate::scheduler::SchedulerHook;
use crate::stats::{CpuStats, StatsSnapshot};
use crate::sync::{Completion, Parker};
use crate::thread::{ExecutionState, Stack, Thread, ThreadBuilder, ThreadFlags, ThreadId, ThreadRef};
use crate::time::TimerService;
use crate::waitq::Waiter;
use crate::workers::DeferredWork;
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use log::{debug, info, warn};
use portable_atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Everything the scheduler needs from the machine it runs on.
pub trait Platform: Arch + TimerService + DeferredWork + Parker + 'static {}

impl<T> Platform for T where T: Arch + TimerService + DeferredWork + Parker + 'static {}

/// Scheduler state owned by one CPU.
pub(crate) struct PerCpu {
    pub(crate) queue: Mutex<QueueState>,
    /// The thread executing on this CPU, the idle thread included.
    pub(crate) current: Mutex<Option<ThreadRef>>,
    /// The thread that was executing when the current interrupt began.
    pub(crate) interrupted: Mutex<Option<ThreadRef>>,
    /// Only ever locked by code running on this CPU.
    pub(crate) idle: ThreadRef,
    pub(crate) stats: CpuStats,
}

/// Main kernel handle that manages the threading system.
///
/// Built once per boot with [`Kernel::new`] and shared as an `Arc`. Every
/// lifecycle operation, the interrupt entry points and the CPU start-up
/// routines are methods on it.
///
/// # Type Parameters
///
/// * `P` - Platform implementation providing the CPU, timer, deferred-work
///   and parking services
pub struct Kernel<P: Platform> {
    pub(crate) this: Weak<Kernel<P>>,
    pub(crate) platform: P,
    config: SchedulerConfig,
    pub(crate) cpus: Vec<PerCpu>,
    /// Holds every fully suspended managed thread.
    pub(crate) suspended: Mutex<QueueState>,
    pub(crate) registry: Registry,
    next_thread_id: AtomicU64,
    manager: Arc<SchedulerHook<P>>,
}

fn idle_loop<P: Platform>(kernel: Weak<Kernel<P>>) {
    loop {
        match kernel.upgrade() {
            Some(kernel) => kernel.platform.wait_for_interrupt(),
            None => core::hint::spin_loop(),
        }
    }
}

impl<P: Platform> Kernel<P> {
    /// Create a new kernel instance.
    ///
    /// # Arguments
    ///
    /// * `platform` - Machine services; its CPU count is fixed from here on
    /// * `config` - Scheduler tunables
    ///
    /// # Returns
    ///
    /// The kernel with one idle thread per CPU and no CPU started yet, or
    /// [`ThreadError::InvalidArgument`] for a bad configuration and
    /// [`ThreadError::TemporaryOutage`] if idle stacks cannot be allocated.
    pub fn new(platform: P, config: SchedulerConfig) -> ThreadResult<Arc<Self>> {
        config.validate()?;
        let cpu_count = platform.cpu_count();
        if cpu_count == 0 {
            return Err(ThreadError::InvalidArgument);
        }

        let mut stacks = Vec::new();
        stacks
            .try_reserve_exact(cpu_count)
            .map_err(|_| ThreadError::TemporaryOutage)?;
        for _ in 0..cpu_count {
            stacks.push(Stack::allocate(config.idle_stack_size)?);
        }

        let kernel = Arc::new_cyclic(|this: &Weak<Self>| {
            let cpus = stacks
                .into_iter()
                .enumerate()
                .map(|(cpu, stack)| {
                    let weak = this.clone();
                    let idle = Thread::new(Some("idle"), Some(stack), Box::new(move || idle_loop(weak)));
                    PerCpu {
                        queue: Mutex::new(QueueState::new(QueueId::Cpu(cpu))),
                        current: Mutex::new(None),
                        interrupted: Mutex::new(None),
                        idle,
                        stats: CpuStats::new(),
                    }
                })
                .collect();

            Kernel {
                this: this.clone(),
                platform,
                config,
                cpus,
                suspended: Mutex::new(QueueState::new(QueueId::Suspended)),
                registry: Registry::new(),
                next_thread_id: AtomicU64::new(0),
                manager: Arc::new(SchedulerHook::new(this.clone())),
            }
        });

        for per_cpu in &kernel.cpus {
            let mut lock = per_cpu.idle.lock();
            lock.hooks.register(HookOwnerId::SCHEDULER, kernel.scheduler_hook())?;
            lock.flags.insert(ThreadFlags::IDLE);
            lock.execution = ExecutionState::NotRunning;
            per_cpu.idle.assign_id(kernel.next_thread_id());
        }

        debug!("scheduler created for {} cpus", cpu_count);
        Ok(kernel)
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn scheduler_hook(&self) -> Arc<dyn ThreadHook> {
        self.manager.clone()
    }

    pub(crate) fn cpu(&self, cpu: CpuId) -> &PerCpu {
        match self.cpus.get(cpu) {
            Some(per_cpu) => per_cpu,
            None => panic!("cpu {} out of range ({} cpus)", cpu, self.cpus.len()),
        }
    }

    /// Generate a new thread id.
    ///
    /// Ids are only reused once the 64-bit counter wraps around, and the
    /// [`ThreadId::INVALID`] sentinel is skipped.
    pub(crate) fn next_thread_id(&self) -> ThreadId {
        loop {
            let id = ThreadId::new(self.next_thread_id.fetch_add(1, Ordering::Relaxed));
            if id.is_valid() {
                return id;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn set_next_thread_id(&self, raw: u64) {
        self.next_thread_id.store(raw, Ordering::Relaxed);
    }

    /// Counters of one CPU, or `None` if `cpu` does not exist.
    pub fn cpu_stats(&self, cpu: CpuId) -> Option<StatsSnapshot> {
        self.cpus.get(cpu).map(|per_cpu| per_cpu.stats.snapshot())
    }

    pub fn idle_thread(&self, cpu: CpuId) -> Option<&ThreadRef> {
        self.cpus.get(cpu).map(|per_cpu| &per_cpu.idle)
    }

    /// The thread executing on the caller's CPU.
    pub fn current_thread(&self) -> Option<ThreadRef> {
        self.current_on(self.platform.current_cpu())
    }

    /// The thread executing on `cpu`, or `None` before the CPU is started.
    pub fn current_on(&self, cpu: CpuId) -> Option<ThreadRef> {
        self.cpus.get(cpu)?.current.lock().clone()
    }

    /// Threads on `cpu`'s run queue, head first.
    pub fn run_queue(&self, cpu: CpuId) -> Vec<ThreadRef> {
        self.cpu(cpu).queue.lock().snapshot()
    }

    pub fn run_queue_len(&self, cpu: CpuId) -> usize {
        self.cpu(cpu).queue.lock().len()
    }

    pub fn suspended_len(&self) -> usize {
        self.suspended.lock().len()
    }

    /// Start managing `thread`.
    ///
    /// The thread must be fresh from a [`ThreadBuilder`]: Suspended and
    /// unlinked. It gets an id, the scheduler hook, a place on the suspended
    /// queue and an entry in the registry; [`Kernel::resume`] makes it run.
    pub fn manage(&self, thread: &ThreadRef) -> ThreadResult<ThreadId> {
        let mut registry = self.registry.lock_for_insert()?;
        let mut lock = thread.lock();

        if lock.execution == ExecutionState::Dead {
            return Err(ThreadError::ThreadDead);
        }
        if lock.flags.contains(ThreadFlags::IDLE) || lock.hooks.find(HookOwnerId::SCHEDULER).is_some() {
            return Err(ThreadError::AlreadyInProgress);
        }
        if lock.execution != ExecutionState::Suspended || thread.is_queued() {
            return Err(ThreadError::InvalidArgument);
        }

        lock.hooks.register(HookOwnerId::SCHEDULER, self.scheduler_hook())?;
        let id = self.next_thread_id();
        thread.assign_id(id);
        self.suspended.lock().push_back(thread);
        registry.push(thread.clone());

        debug!("managing thread {} ({})", id, thread.name().unwrap_or("unnamed"));
        Ok(id)
    }

    /// Build a thread with the configured default stack size and manage it.
    ///
    /// The thread stays suspended until it is resumed.
    pub fn spawn<F>(&self, name: &'static str, entry: F) -> ThreadResult<ThreadRef>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = ThreadBuilder::new()
            .name(name)
            .stack_size(self.config.default_stack_size)
            .spawn(entry)?;
        self.manage(&thread)?;
        Ok(thread)
    }

    /// Start scheduling on the calling CPU with `thread` as its first thread.
    ///
    /// `thread` is typically the control block adopted for the code already
    /// running on this CPU. It becomes Running at the head of the CPU's run
    /// queue, joins the registry, and the quantum timer is armed.
    pub fn start_cpu(&self, thread: &ThreadRef) -> ThreadResult<ThreadId> {
        let cpu = self.platform.current_cpu();
        let per_cpu = self.cpu(cpu);

        let mut registry = self.registry.lock_for_insert()?;
        let mut lock = thread.lock();
        if lock.execution == ExecutionState::Dead {
            return Err(ThreadError::ThreadDead);
        }
        if !lock.hooks.is_empty() || thread.is_queued() {
            return Err(ThreadError::InvalidArgument);
        }

        lock.hooks.register(HookOwnerId::SCHEDULER, self.scheduler_hook())?;
        let id = self.next_thread_id();
        thread.assign_id(id);
        lock.execution = ExecutionState::Running;
        {
            let mut queue = per_cpu.queue.lock();
            if queue.active {
                panic!("cpu {} started twice", cpu);
            }
            queue.push_front(thread);
            queue.active = true;
        }
        *per_cpu.current.lock() = Some(thread.clone());
        registry.push(thread.clone());
        drop(lock);
        drop(registry);

        self.arm_timer(cpu);
        info!("cpu {}: scheduler started on thread {}", cpu, id);
        Ok(id)
    }

    /// Start scheduling on the calling CPU with nothing to run yet.
    ///
    /// Returns the CPU's idle thread, which is now executing; the caller
    /// hands it to the architecture code.
    pub fn start_cpu_idle(&self) -> ThreadRef {
        let cpu = self.platform.current_cpu();
        let per_cpu = self.cpu(cpu);

        let mut lock = per_cpu.idle.lock();
        lock.execution = ExecutionState::Running;
        {
            let mut queue = per_cpu.queue.lock();
            if queue.active {
                panic!("cpu {} started twice", cpu);
            }
            queue.active = true;
        }
        *per_cpu.current.lock() = Some(per_cpu.idle.clone());
        drop(lock);

        self.arm_timer(cpu);
        info!("cpu {}: scheduler started idle", cpu);
        per_cpu.idle.clone()
    }

    /// Start the calling CPU on `thread` and jump into it.
    pub fn bootstrap(&self, thread: &ThreadRef) -> ! {
        if let Err(err) = self.start_cpu(thread) {
            panic!("failed to start the bootstrap cpu: {}", err);
        }
        self.platform.bootstrap(thread)
    }

    /// Interrupt entry. Must be called by the trap path before anything
    /// else that may touch the scheduler.
    pub fn interrupt_start(&self) {
        let cpu = self.platform.current_cpu();
        match self.current_on(cpu) {
            Some(thread) => {
                *self.cpu(cpu).interrupted.lock() = Some(thread.clone());
                hooks::dispatch_interrupt(&thread, HookEvent::Interrupted);
            }
            None => warn!("cpu {}: interrupt before the scheduler started", cpu),
        }
    }

    /// Interrupt exit. Must be the last scheduler call of the trap path.
    pub fn interrupt_end(&self) {
        let cpu = self.platform.current_cpu();
        if let Some(thread) = self.current_on(cpu) {
            hooks::dispatch_interrupt(&thread, HookEvent::EndingInterrupt);
        }
        if let Some(per_cpu) = self.cpus.get(cpu) {
            per_cpu.interrupted.lock().take();
        }
    }

    /// Run `handler` bracketed by [`Kernel::interrupt_start`] and
    /// [`Kernel::interrupt_end`].
    pub fn handle_interrupt<R>(&self, handler: impl FnOnce() -> R) -> R {
        self.interrupt_start();
        let result = handler();
        self.interrupt_end();
        result
    }

    /// Park the caller until `thread` has died and its death was announced.
    pub fn join(&self, thread: &ThreadRef) -> ThreadResult<()> {
        let lock = thread.lock();
        if lock.hooks.is_empty() || lock.flags.contains(ThreadFlags::IDLE) {
            return Err(ThreadError::InvalidArgument);
        }
        if lock.flags.contains(ThreadFlags::DEATH_NOTIFIED) {
            return Ok(());
        }
        let done = Completion::new();
        thread.death_wait.wait(&self.completion_waiter(&done));
        drop(lock);
        done.wait(&self.platform);
        Ok(())
    }

    /// A waiter that completes `done` when woken.
    pub(crate) fn completion_waiter(&self, done: &Arc<Completion>) -> Arc<Waiter> {
        let this = self.this.clone();
        let done = done.clone();
        Waiter::new(move || {
            if let Some(kernel) = this.upgrade() {
                done.complete(&kernel.platform);
            }
        })
    }
}
