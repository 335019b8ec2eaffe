//! Quantum enforcement.
//!
//! Every active CPU keeps one one-shot timer armed. When it fires (in
//! interrupt context, between [`Kernel::interrupt_start`] and
//! [`Kernel::interrupt_end`]) the CPU rotates its run queue and switches to
//! the next eligible thread.

use crate::arch::CpuId;
use crate::kernel::{Kernel, Platform};
use crate::thread::{ExecutionState, ThreadFlags, ThreadLock, ThreadRef};
use alloc::boxed::Box;
use alloc::sync::Arc;
use log::{trace, warn};

impl<P: Platform> Kernel<P> {
    /// Arm `cpu`'s quantum timer unless it is already armed or the CPU is
    /// not started.
    pub(crate) fn arm_timer(&self, cpu: CpuId) {
        let mut queue = self.cpu(cpu).queue.lock();
        if !queue.active || queue.timer.is_some() {
            return;
        }
        queue.timer_seq = queue.timer_seq.wrapping_add(1);
        let seq = queue.timer_seq;
        let this = self.this.clone();
        let callback = Box::new(move || {
            if let Some(kernel) = this.upgrade() {
                kernel.quantum_expired(cpu, Some(seq));
            }
        });
        match self.platform.schedule_oneshot(self.config().quantum_ns, callback) {
            Ok(id) => queue.timer = Some(id),
            Err(err) => panic!("cpu {}: failed to arm the preemption timer: {}", cpu, err),
        }
    }

    pub(crate) fn disarm_timer(&self, cpu: CpuId) {
        let mut queue = self.cpu(cpu).queue.lock();
        queue.timer_seq = queue.timer_seq.wrapping_add(1);
        if let Some(id) = queue.timer.take() {
            if let Err(err) = self.platform.cancel(id) {
                warn!("cpu {}: failed to cancel preemption timer {:?}: {}", cpu, id, err);
            }
        }
    }

    /// Expire the current quantum on `cpu` right away, cancelling its armed
    /// timer.
    pub(crate) fn timed_context_switch(&self, cpu: CpuId) {
        self.quantum_expired(cpu, None);
    }

    /// Quantum expiry on `cpu`.
    ///
    /// `seq` identifies the firing timer; a timer that was disarmed or
    /// replaced in the meantime is ignored. `None` forces the expiry.
    ///
    /// Rotation only advances past the outgoing thread if it is the one the
    /// current interrupt interrupted; otherwise the scan starts at the head.
    /// Blocked threads are skipped. If the chosen thread's lock is contended
    /// the current thread keeps the CPU for another quantum.
    pub(crate) fn quantum_expired(&self, cpu: CpuId, seq: Option<u64>) {
        let per_cpu = self.cpu(cpu);
        let Some(old) = per_cpu.current.lock().clone() else {
            return;
        };
        let old_is_idle = Arc::ptr_eq(&old, &per_cpu.idle);
        let was_interrupted = per_cpu
            .interrupted
            .lock()
            .as_ref()
            .is_some_and(|interrupted| Arc::ptr_eq(interrupted, &old));

        let mut old_lock = old.lock();
        let mut queue = per_cpu.queue.lock();
        match seq {
            Some(seq) if seq != queue.timer_seq => {
                trace!("cpu {}: ignoring stale preemption timer", cpu);
                return;
            }
            Some(_) => queue.timer = None,
            None => {
                if let Some(id) = queue.timer.take() {
                    queue.timer_seq = queue.timer_seq.wrapping_add(1);
                    if self.platform.cancel(id).is_err() {
                        trace!("cpu {}: preemption timer {:?} already fired", cpu, id);
                    }
                }
            }
        }
        per_cpu.stats.record_quantum_expiration();

        let old_active = !old_is_idle
            && was_interrupted
            && queue.contains(&old)
            && old_lock.execution == ExecutionState::Interrupted;
        let start = if old_active {
            Some(queue.next_after(&old))
        } else {
            queue.head().cloned()
        };
        let candidate = start.and_then(|start| queue.find_from(&start, |t| !t.is_blocked()));

        let switched = match candidate {
            Some(new) if Arc::ptr_eq(&new, &old) => false,
            Some(new) => match new.try_lock() {
                Some(mut new_lock) => {
                    queue.rotate_to(&new);
                    new_lock.execution = ExecutionState::Interrupted;
                    leave_cpu(&mut old_lock);
                    self.switch_to(cpu, Some(&old), &new);
                    true
                }
                None => {
                    warn!("cpu {}: thread {} is busy, thread {} keeps the cpu", cpu, new.id(), old.id());
                    false
                }
            },
            None if !old_is_idle => {
                let idle = &per_cpu.idle;
                idle.lock().execution = ExecutionState::Interrupted;
                leave_cpu(&mut old_lock);
                self.switch_to(cpu, Some(&old), idle);
                true
            }
            None => false,
        };
        drop(queue);

        if switched && old_lock.flags.intersects(ThreadFlags::PENDING_TRANSITIONS) {
            // requested after the interrupt began; nothing else will apply it
            self.apply_pending(&old, &mut old_lock);
        }
        drop(old_lock);

        self.arm_timer(cpu);
    }

    /// Make `new` the thread executing on `cpu`.
    ///
    /// `old` is `None` when the outgoing context is discarded.
    pub(crate) fn switch_to(&self, cpu: CpuId, old: Option<&ThreadRef>, new: &ThreadRef) {
        let per_cpu = self.cpu(cpu);
        *per_cpu.current.lock() = Some(new.clone());
        per_cpu.stats.record_context_switch(Arc::ptr_eq(new, &per_cpu.idle));
        trace!(
            "cpu {}: switching {:?} -> {}",
            cpu,
            old.map(|thread| thread.id()),
            new.id()
        );
        self.platform.switch(old, new);
    }
}

fn leave_cpu(lock: &mut ThreadLock<'_>) {
    if lock.execution.is_executing() {
        lock.execution = ExecutionState::NotRunning;
    }
}
