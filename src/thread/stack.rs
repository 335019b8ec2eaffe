//! Kernel stacks for threads.
//!
//! The lowest words of every stack are filled with a canary pattern so that
//! an overflow can be detected when the stack is inspected or released.

use crate::error::{ThreadError, ThreadResult};
use alloc::vec::Vec;

/// Smallest stack that still leaves room above the canary region.
pub const MIN_STACK_SIZE: usize = 4096;

const CANARY_WORDS: usize = 8;
const CANARY_VALUE: u64 = 0xDEAD_BEEF_CAFE_BABE;
const WORD: usize = core::mem::size_of::<u64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    Ok,
    /// Some canary words were overwritten.
    Corrupted { corrupted_bytes: usize },
}

/// An owned, word-aligned kernel stack.
pub struct Stack {
    memory: Vec<u64>,
}

impl Stack {
    /// Allocate a stack of at least `size` bytes.
    ///
    /// Returns [`ThreadError::TemporaryOutage`] when the allocator cannot
    /// satisfy the request.
    pub fn allocate(size: usize) -> ThreadResult<Self> {
        if size < MIN_STACK_SIZE {
            return Err(ThreadError::InvalidArgument);
        }
        let words = size.div_ceil(WORD);
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(words)
            .map_err(|_| ThreadError::TemporaryOutage)?;
        memory.resize(words, 0);
        memory[..CANARY_WORDS].fill(CANARY_VALUE);
        Ok(Self { memory })
    }

    pub fn size(&self) -> usize {
        self.memory.len() * WORD
    }

    /// Address one past the highest usable byte; stacks grow downwards.
    pub fn top(&self) -> usize {
        self.memory.as_ptr() as usize + self.size()
    }

    pub fn bottom(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    pub fn check_overflow(&self) -> StackStatus {
        let corrupted = self.memory[..CANARY_WORDS]
            .iter()
            .filter(|&&word| word != CANARY_VALUE)
            .count();
        if corrupted == 0 {
            StackStatus::Ok
        } else {
            StackStatus::Corrupted {
                corrupted_bytes: corrupted * WORD,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn smash_canary(&mut self) {
        self.memory[0] = 0;
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let StackStatus::Corrupted { corrupted_bytes } = self.check_overflow() {
            log::warn!(
                "releasing stack at {:#x} with {} corrupted guard bytes",
                self.bottom(),
                corrupted_bytes
            );
        }
    }
}
