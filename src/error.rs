use core::fmt;

/// Errors returned by the lifecycle API and thread construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// The thread has no manager, does not exist, or an argument was malformed.
    InvalidArgument,
    /// The requested transition was already requested or already happened.
    AlreadyInProgress,
    /// The thread is dead or has an imminent death.
    ThreadDead,
    /// Resources for a new thread (or for adopting one) could not be allocated.
    TemporaryOutage,
    /// Every hook slot on the thread is occupied.
    HookTableFull,
}

impl ThreadError {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadError::InvalidArgument => "Invalid or unmanaged thread argument",
            ThreadError::AlreadyInProgress => "Transition already in progress",
            ThreadError::ThreadDead => "Thread is dead or dying",
            ThreadError::TemporaryOutage => "Insufficient resources",
            ThreadError::HookTableFull => "Thread hook table is full",
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ThreadError {}

pub type ThreadResult<T> = Result<T, ThreadError>;

/// How a successfully accepted lifecycle request was carried out.
///
/// A request against a thread that is currently executing cannot be applied
/// in place; it is applied when the thread next enters an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The transition was fully applied before the call returned.
    Completed,
    /// The transition was recorded and will complete at the thread's next
    /// context-switch boundary.
    Pending,
}

impl Transition {
    pub fn is_pending(self) -> bool {
        self == Transition::Pending
    }
}
