//! Architecture abstraction layer for context switching and CPU topology.
//!
//! The scheduler never touches registers or stacks itself. Everything that
//! depends on the CPU is funneled through the [`Arch`] trait, which the
//! embedding kernel implements once per supported architecture.

use crate::thread::ThreadRef;

/// Index of a logical CPU, in `0..cpu_count()`.
pub type CpuId = usize;

/// Architecture abstraction trait.
///
/// # Interrupt context
///
/// [`Arch::switch`] may be called from interrupt context (from the quantum
/// timer or from interrupt entry). In that case the implementation must
/// not switch stacks immediately; it rewrites the interrupt return frame so
/// that `new` is resumed when the interrupt returns.
pub trait Arch: Send + Sync {
    /// Index of the CPU executing the caller.
    fn current_cpu(&self) -> CpuId;

    /// Number of CPUs the scheduler manages. Must not change after boot.
    fn cpu_count(&self) -> usize;

    /// Save the context of `old` (if any) and load the context of `new`.
    ///
    /// `old` is `None` when the outgoing context must be discarded.
    fn switch(&self, old: Option<&ThreadRef>, new: &ThreadRef);

    /// Load `thread` as the first thread of the current CPU. Never returns.
    fn bootstrap(&self, thread: &ThreadRef) -> !;

    /// Force a reschedule interrupt on `cpu` as soon as possible.
    ///
    /// When `cpu` is the caller's own CPU this may raise the interrupt
    /// before returning, so callers must not hold the target thread's lock.
    fn request_preemption(&self, cpu: CpuId);

    /// Halt the current CPU until the next interrupt arrives.
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }
}
