//! A hosted, deterministic [`Platform`](crate::Platform).
//!
//! Time only moves when [`SimPlatform::advance`] is called, context switches
//! and preemption requests are recorded instead of performed, and deferred
//! work runs when [`SimPlatform::drain_deferred`] is called. Interrupts are
//! simulated by the caller, typically as
//! `kernel.handle_interrupt(|| platform.advance(quantum))`.

use crate::arch::{Arch, CpuId};
use crate::sync::Parker;
use crate::thread::{ThreadId, ThreadRef};
use crate::time::{TimerCallback, TimerError, TimerId, TimerService};
use crate::workers::{DeferredWork, Work};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;
use std::sync::{Condvar, Mutex as StdMutex, PoisonError};

/// One recorded call to [`Arch::switch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub cpu: CpuId,
    pub from: Option<ThreadId>,
    pub to: ThreadId,
}

#[derive(Default)]
struct Timers {
    next_id: u64,
    /// Keyed by `(deadline, id)` so firing order is deterministic.
    armed: BTreeMap<(u64, u64), TimerCallback>,
}

pub struct SimPlatform {
    cpu_count: usize,
    current_cpu: AtomicUsize,
    now: AtomicU64,
    timers: Mutex<Timers>,
    switches: Mutex<Vec<Switch>>,
    preemptions: Mutex<Vec<CpuId>>,
    deferred: Mutex<VecDeque<Work>>,
    fail_timers: AtomicBool,
    parked: StdMutex<()>,
    unparked: Condvar,
}

impl SimPlatform {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            current_cpu: AtomicUsize::new(0),
            now: AtomicU64::new(0),
            timers: Mutex::new(Timers::default()),
            switches: Mutex::new(Vec::new()),
            preemptions: Mutex::new(Vec::new()),
            deferred: Mutex::new(VecDeque::new()),
            fail_timers: AtomicBool::new(false),
            parked: StdMutex::new(()),
            unparked: Condvar::new(),
        }
    }

    /// Pretend the caller now runs on `cpu`.
    pub fn set_current_cpu(&self, cpu: CpuId) {
        assert!(cpu < self.cpu_count, "cpu {} out of range", cpu);
        self.current_cpu.store(cpu, Ordering::SeqCst);
    }

    /// Move the clock forward by `ns`, firing every timer that comes due in
    /// deadline order. Callbacks run with no simulator lock held.
    pub fn advance(&self, ns: u64) {
        let target = self.now.load(Ordering::SeqCst).saturating_add(ns);
        loop {
            let due = {
                let mut timers = self.timers.lock();
                match timers.armed.keys().next().copied() {
                    Some(key) if key.0 <= target => timers.armed.remove(&key).map(|cb| (key.0, cb)),
                    _ => None,
                }
            };
            let Some((deadline, callback)) = due else {
                break;
            };
            self.now.fetch_max(deadline, Ordering::SeqCst);
            callback();
        }
        self.now.store(target, Ordering::SeqCst);
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.lock().armed.len()
    }

    /// Make every following `schedule_oneshot` fail.
    pub fn fail_timers(&self, fail: bool) {
        self.fail_timers.store(fail, Ordering::SeqCst);
    }

    /// Run queued deferred work, including work queued while draining.
    pub fn drain_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.deferred.lock().pop_front();
            match next {
                Some(work) => {
                    work();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.lock().len()
    }

    pub fn switches(&self) -> Vec<Switch> {
        self.switches.lock().clone()
    }

    pub fn last_switch(&self) -> Option<Switch> {
        self.switches.lock().last().copied()
    }

    /// Preemption requests recorded since the last call, oldest first.
    pub fn take_preemptions(&self) -> Vec<CpuId> {
        core::mem::take(&mut *self.preemptions.lock())
    }
}

impl Arch for SimPlatform {
    fn current_cpu(&self) -> CpuId {
        self.current_cpu.load(Ordering::SeqCst)
    }

    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn switch(&self, old: Option<&ThreadRef>, new: &ThreadRef) {
        self.switches.lock().push(Switch {
            cpu: self.current_cpu(),
            from: old.map(|thread| thread.id()),
            to: new.id(),
        });
    }

    fn bootstrap(&self, thread: &ThreadRef) -> ! {
        panic!("simulated cpus cannot jump into thread {}", thread.id())
    }

    fn request_preemption(&self, cpu: CpuId) {
        self.preemptions.lock().push(cpu);
    }
}

impl TimerService for SimPlatform {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn schedule_oneshot(&self, delay_ns: u64, callback: TimerCallback) -> Result<TimerId, TimerError> {
        if self.fail_timers.load(Ordering::SeqCst) {
            return Err(TimerError::Unavailable);
        }
        let deadline = self.now_ns().saturating_add(delay_ns);
        let mut timers = self.timers.lock();
        timers.next_id += 1;
        let id = timers.next_id;
        timers.armed.insert((deadline, id), callback);
        Ok(TimerId(id))
    }

    fn cancel(&self, id: TimerId) -> Result<(), TimerError> {
        let mut timers = self.timers.lock();
        let key = timers
            .armed
            .keys()
            .find(|(_, armed)| *armed == id.0)
            .copied()
            .ok_or(TimerError::NotArmed)?;
        // dropped outside the lock
        let callback = timers.armed.remove(&key);
        drop(timers);
        drop(callback);
        Ok(())
    }
}

impl DeferredWork for SimPlatform {
    fn schedule_work(&self, work: Work) {
        self.deferred.lock().push_back(work);
    }
}

impl Parker for SimPlatform {
    fn park_until(&self, flag: &AtomicBool) {
        let mut guard = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        while !flag.load(Ordering::Acquire) {
            guard = self
                .unparked
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn unpark_all(&self) {
        let _guard = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        self.unparked.notify_all();
    }
}
