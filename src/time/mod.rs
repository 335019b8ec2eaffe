//! Timer service interface and thread timeouts.

pub mod timer;

pub use timer::{TimerCallback, TimerError, TimerId, TimerService};

use crate::error::{ThreadError, ThreadResult};

/// Default scheduling quantum, in nanoseconds.
pub const DEFAULT_QUANTUM_NS: u64 = 500_000;

/// How a [`Timeout`] value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeoutKind {
    /// Nanoseconds counted from the moment the thread is fully suspended.
    Relative = 0,
    /// An absolute reading of the monotonic clock, in nanoseconds.
    ///
    /// The timer is only armed once the thread is fully suspended, so a
    /// deadline that has already passed fires immediately.
    AbsoluteMonotonic = 1,
}

impl TryFrom<u8> for TimeoutKind {
    type Error = ThreadError;

    fn try_from(raw: u8) -> ThreadResult<Self> {
        match raw {
            0 => Ok(TimeoutKind::Relative),
            1 => Ok(TimeoutKind::AbsoluteMonotonic),
            _ => Err(ThreadError::InvalidArgument),
        }
    }
}

/// A wake-up deadline attached to a suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub value: u64,
    pub kind: TimeoutKind,
}

impl Timeout {
    pub const fn relative_ns(value: u64) -> Self {
        Self {
            value,
            kind: TimeoutKind::Relative,
        }
    }

    pub const fn absolute_ns(value: u64) -> Self {
        Self {
            value,
            kind: TimeoutKind::AbsoluteMonotonic,
        }
    }

    /// Build a timeout from raw syscall arguments.
    pub fn from_raw(value: u64, kind: u8) -> ThreadResult<Self> {
        Ok(Self {
            value,
            kind: TimeoutKind::try_from(kind)?,
        })
    }

    /// A zero value disables the timeout regardless of its kind.
    pub fn is_disabled(&self) -> bool {
        self.value == 0
    }

    /// Delay until the deadline, given the current monotonic time.
    pub fn delay_from(&self, now_ns: u64) -> u64 {
        match self.kind {
            TimeoutKind::Relative => self.value,
            TimeoutKind::AbsoluteMonotonic => self.value.saturating_sub(now_ns),
        }
    }
}
