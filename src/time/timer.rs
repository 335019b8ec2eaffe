//! One-shot timer service consumed by the scheduler.

use alloc::boxed::Box;
use core::fmt;

/// Identifier of an armed one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Callback run when a one-shot timer fires.
///
/// Callbacks run in interrupt context on the CPU that armed the timer.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Timer abstraction for the platform's one-shot timers.
pub trait TimerService: Send + Sync {
    /// Current reading of the monotonic clock, in nanoseconds.
    fn now_ns(&self) -> u64;

    /// Arm a timer that runs `callback` once `delay_ns` nanoseconds elapse.
    fn schedule_oneshot(&self, delay_ns: u64, callback: TimerCallback) -> Result<TimerId, TimerError>;

    /// Cancel a previously armed timer.
    ///
    /// Fails with [`TimerError::NotArmed`] if the timer already fired or was
    /// already cancelled.
    fn cancel(&self, id: TimerId) -> Result<(), TimerError>;
}

/// Errors that can occur during timer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The timer already fired or was cancelled
    NotArmed,
    /// No timer slot could be allocated
    Unavailable,
    /// Hardware timer is not initialized
    NotInitialized,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TimerError::NotArmed => "timer is not armed",
            TimerError::Unavailable => "no timer available",
            TimerError::NotInitialized => "timer not initialized",
        };
        f.write_str(msg)
    }
}
