//! Per-thread lifecycle hooks.
//!
//! Several subsystems may control the same thread (the scheduler, a process
//! manager, a debugger stub). Each one installs a [`ThreadHook`] into one of
//! the thread's [`HOOK_SLOTS`] slots under its own [`HookOwnerId`]. Every
//! lifecycle event is offered to every occupied slot in slot order, and at
//! least one of them must claim it.

use crate::error::{ThreadError, ThreadResult, Transition};
use crate::thread::{ThreadLock, ThreadRef};
use alloc::sync::Arc;
use core::fmt;

/// Number of hook slots on every thread.
pub const HOOK_SLOTS: usize = 4;

/// Opaque identifier of the subsystem that owns a hook slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookOwnerId(pub u64);

impl HookOwnerId {
    /// The owner id used by the scheduler's own hook.
    pub const SCHEDULER: HookOwnerId = HookOwnerId(0x7363_6865_6400_0001);
}

/// What a hook did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// The event is none of this hook's business.
    NotApplicable,
    /// The event was fully handled before returning.
    Handled,
    /// The event was accepted and will complete later.
    HandledAsync,
}

/// Lifecycle callbacks a subsystem can attach to a thread.
///
/// The transition callbacks are invoked with the thread lock held and may
/// release it temporarily through [`ThreadLock::unlocked`]. The interrupt
/// callbacks are invoked without it. Every callback defaults to
/// [`HookResult::NotApplicable`].
#[allow(unused_variables)]
pub trait ThreadHook: Send + Sync {
    fn suspend(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        HookResult::NotApplicable
    }

    fn resume(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        HookResult::NotApplicable
    }

    fn kill(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        HookResult::NotApplicable
    }

    fn block(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        HookResult::NotApplicable
    }

    fn unblock(&self, thread: &ThreadRef, lock: &mut ThreadLock<'_>) -> HookResult {
        HookResult::NotApplicable
    }

    /// The CPU running `thread` took an interrupt.
    fn interrupted(&self, thread: &ThreadRef) -> HookResult {
        HookResult::NotApplicable
    }

    /// The interrupt is about to return into `thread`.
    fn ending_interrupt(&self, thread: &ThreadRef) -> HookResult {
        HookResult::NotApplicable
    }
}

#[derive(Clone)]
struct HookSlot {
    owner: HookOwnerId,
    hook: Arc<dyn ThreadHook>,
}

/// Fixed-size table of hook slots.
#[derive(Clone, Default)]
pub struct HookTable {
    slots: [Option<HookSlot>; HOOK_SLOTS],
}

impl HookTable {
    pub const fn new() -> Self {
        Self {
            slots: [None, None, None, None],
        }
    }

    /// Install `hook` in the first free slot and return its index.
    ///
    /// Each owner holds at most one slot.
    pub fn register(&mut self, owner: HookOwnerId, hook: Arc<dyn ThreadHook>) -> ThreadResult<usize> {
        if self.find(owner).is_some() {
            return Err(ThreadError::AlreadyInProgress);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ThreadError::HookTableFull)?;
        self.slots[index] = Some(HookSlot { owner, hook });
        Ok(index)
    }

    pub fn find(&self, owner: HookOwnerId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(slot) if slot.owner == owner))
    }

    /// The hook in slot `index`, if occupied.
    pub fn get(&self, index: usize) -> Option<Arc<dyn ThreadHook>> {
        self.slots.get(index)?.as_ref().map(|slot| slot.hook.clone())
    }

    pub fn owner(&self, index: usize) -> Option<HookOwnerId> {
        self.slots.get(index)?.as_ref().map(|slot| slot.owner)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| slot.as_ref().map(|slot| slot.owner)))
            .finish()
    }
}

/// Lifecycle events delivered through the hook table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Suspend,
    Resume,
    Kill,
    Block,
    Unblock,
    Interrupted,
    EndingInterrupt,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::Suspend => "suspend",
            HookEvent::Resume => "resume",
            HookEvent::Kill => "kill",
            HookEvent::Block => "block",
            HookEvent::Unblock => "unblock",
            HookEvent::Interrupted => "interrupted",
            HookEvent::EndingInterrupt => "ending_interrupt",
        }
    }
}

/// Folds the results of every slot into the outcome of one event.
#[derive(Debug, Default)]
pub(crate) struct HookOutcome {
    handled: bool,
    pending: bool,
}

impl HookOutcome {
    pub(crate) fn record(&mut self, result: HookResult) {
        match result {
            HookResult::NotApplicable => {}
            HookResult::Handled => self.handled = true,
            HookResult::HandledAsync => self.pending = true,
        }
    }

    /// Panics when no slot claimed the event; an unclaimed event means the
    /// thread's state no longer matches what its managers believe.
    pub(crate) fn finish(self, event: HookEvent, thread: &ThreadRef) -> Transition {
        if self.pending {
            Transition::Pending
        } else if self.handled {
            Transition::Completed
        } else {
            panic!("no hook handled {} for thread {}", event.as_str(), thread.id())
        }
    }
}

/// Offer a transition event to every occupied slot, in slot order.
///
/// Slots are re-read after each callback because callbacks may release the
/// thread lock.
pub(crate) fn dispatch(thread: &ThreadRef, lock: &mut ThreadLock<'_>, event: HookEvent) -> Transition {
    let mut outcome = HookOutcome::default();
    for index in 0..HOOK_SLOTS {
        let Some(hook) = lock.hooks.get(index) else {
            continue;
        };
        let result = match event {
            HookEvent::Suspend => hook.suspend(thread, lock),
            HookEvent::Resume => hook.resume(thread, lock),
            HookEvent::Kill => hook.kill(thread, lock),
            HookEvent::Block => hook.block(thread, lock),
            HookEvent::Unblock => hook.unblock(thread, lock),
            HookEvent::Interrupted | HookEvent::EndingInterrupt => {
                panic!("{} is not a transition event", event.as_str())
            }
        };
        outcome.record(result);
    }
    outcome.finish(event, thread)
}

/// Offer an interrupt event to every occupied slot without the thread lock.
pub(crate) fn dispatch_interrupt(thread: &ThreadRef, event: HookEvent) -> Transition {
    let mut outcome = HookOutcome::default();
    for index in 0..HOOK_SLOTS {
        let Some(hook) = thread.lock().hooks.get(index) else {
            continue;
        };
        let result = match event {
            HookEvent::Interrupted => hook.interrupted(thread),
            HookEvent::EndingInterrupt => hook.ending_interrupt(thread),
            _ => panic!("{} is not an interrupt event", event.as_str()),
        };
        outcome.record(result);
    }
    outcome.finish(event, thread)
}
