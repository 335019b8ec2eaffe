//! Intrusive circular run queues.
//!
//! Each thread carries its own `prev`/`next` links (in [`QueueLink`]) plus the
//! id of the queue that owns them. A thread is on at most one queue, and its
//! links are set exactly when it is. Breaking either rule is a kernel bug and
//! panics.
//!
//! Queue operations are performed with the queue lock held. Link locks are
//! leaves: they are taken one at a time, never nested.

use crate::arch::CpuId;
use crate::thread::{Thread, ThreadRef};
use crate::time::TimerId;
use alloc::sync::Arc;

/// Identifies a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// The run queue of a CPU.
    Cpu(CpuId),
    /// The queue every fully suspended thread lives on.
    Suspended,
}

/// A thread's linkage into a queue.
#[derive(Default)]
pub struct QueueLink {
    pub(crate) prev: Option<ThreadRef>,
    pub(crate) next: Option<ThreadRef>,
    pub(crate) queue: Option<QueueId>,
}

impl QueueLink {
    pub fn is_linked(&self) -> bool {
        let linked = self.queue.is_some();
        if self.prev.is_some() != linked || self.next.is_some() != linked {
            panic!("thread queue links are inconsistent");
        }
        linked
    }
}

/// State protected by a queue lock.
pub struct QueueState {
    id: QueueId,
    head: Option<ThreadRef>,
    tail: Option<ThreadRef>,
    count: usize,
    /// Whether the owning CPU is accepting threads.
    pub(crate) active: bool,
    /// The armed preemption timer, if any.
    pub(crate) timer: Option<TimerId>,
    /// Bumped whenever the preemption timer is armed or disarmed, so a
    /// callback of a timer that was replaced can tell.
    pub(crate) timer_seq: u64,
}

fn next_of(thread: &Thread) -> ThreadRef {
    match thread.link.lock().next.clone() {
        Some(next) => next,
        None => panic!("queued thread {} has no next link", thread.id()),
    }
}

fn prev_of(thread: &Thread) -> ThreadRef {
    match thread.link.lock().prev.clone() {
        Some(prev) => prev,
        None => panic!("queued thread {} has no prev link", thread.id()),
    }
}

fn set_next(thread: &Thread, next: ThreadRef) {
    thread.link.lock().next = Some(next);
}

fn set_prev(thread: &Thread, prev: ThreadRef) {
    thread.link.lock().prev = Some(prev);
}

impl QueueState {
    pub const fn new(id: QueueId) -> Self {
        Self {
            id,
            head: None,
            tail: None,
            count: 0,
            active: false,
            timer: None,
            timer_seq: 0,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn head(&self) -> Option<&ThreadRef> {
        self.head.as_ref()
    }

    pub fn tail(&self) -> Option<&ThreadRef> {
        self.tail.as_ref()
    }

    pub fn contains(&self, thread: &Thread) -> bool {
        thread.link.lock().queue == Some(self.id)
    }

    fn assert_member(&self, thread: &Thread) {
        if !self.contains(thread) {
            panic!("thread {} is not on queue {:?}", thread.id(), self.id);
        }
    }

    /// Append `thread` at the tail.
    pub fn push_back(&mut self, thread: &ThreadRef) {
        let neighbours = match (self.head.clone(), self.tail.clone()) {
            (Some(head), Some(tail)) => Some((tail, head)),
            (None, None) => None,
            _ => panic!("queue {:?} has a head without a tail", self.id),
        };

        {
            let mut link = thread.link.lock();
            if link.is_linked() {
                panic!("thread {} is already on queue {:?}", thread.id(), link.queue);
            }
            let (prev, next) = match &neighbours {
                Some((tail, head)) => (tail.clone(), head.clone()),
                None => (thread.clone(), thread.clone()),
            };
            link.prev = Some(prev);
            link.next = Some(next);
            link.queue = Some(self.id);
        }

        match neighbours {
            Some((tail, head)) => {
                set_next(&tail, thread.clone());
                set_prev(&head, thread.clone());
            }
            None => self.head = Some(thread.clone()),
        }
        self.tail = Some(thread.clone());
        self.count += 1;
    }

    /// Insert `thread` at the head, so it is the next to be considered.
    pub fn push_front(&mut self, thread: &ThreadRef) {
        self.push_back(thread);
        self.rotate_to(thread);
    }

    /// Unlink `thread`, dropping every reference the queue held to it.
    pub fn remove(&mut self, thread: &ThreadRef) {
        self.assert_member(thread);

        let (prev, next) = {
            let mut link = thread.link.lock();
            link.queue = None;
            match (link.prev.take(), link.next.take()) {
                (Some(prev), Some(next)) => (prev, next),
                _ => panic!("queued thread {} is missing links", thread.id()),
            }
        };

        self.count -= 1;
        if self.count == 0 {
            self.head = None;
            self.tail = None;
            return;
        }

        set_next(&prev, next.clone());
        set_prev(&next, prev.clone());
        if self.head.as_ref().is_some_and(|head| Arc::ptr_eq(head, thread)) {
            self.head = Some(next);
        }
        if self.tail.as_ref().is_some_and(|tail| Arc::ptr_eq(tail, thread)) {
            self.tail = Some(prev);
        }
    }

    /// Make `thread` the head of the queue without changing the cyclic order.
    pub fn rotate_to(&mut self, thread: &ThreadRef) {
        self.assert_member(thread);
        self.tail = Some(prev_of(thread));
        self.head = Some(thread.clone());
    }

    /// The thread after `thread` in cyclic order.
    pub fn next_after(&self, thread: &ThreadRef) -> ThreadRef {
        self.assert_member(thread);
        next_of(thread)
    }

    /// Walk the queue once, starting at `start`, and return the first thread
    /// accepted by `eligible`.
    pub fn find_from(&self, start: &ThreadRef, mut eligible: impl FnMut(&ThreadRef) -> bool) -> Option<ThreadRef> {
        self.assert_member(start);
        let mut candidate = start.clone();
        for _ in 0..self.count {
            if eligible(&candidate) {
                return Some(candidate);
            }
            candidate = next_of(&candidate);
        }
        None
    }

    /// Threads in queue order, starting at the head.
    pub fn snapshot(&self) -> alloc::vec::Vec<ThreadRef> {
        let mut threads = alloc::vec::Vec::with_capacity(self.count);
        if let Some(head) = &self.head {
            let mut cursor = head.clone();
            for _ in 0..self.count {
                let next = next_of(&cursor);
                threads.push(cursor);
                cursor = next;
            }
        }
        threads
    }
}
