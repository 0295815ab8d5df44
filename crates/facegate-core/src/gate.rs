//! One-shot handshake between a worker about to persist and the caller
//! waiting on it.
//!
//! Exactly one side wins: either the worker claims the commit and the write
//! goes ahead, or the caller cancels first and nothing is written.

use std::sync::atomic::{AtomicU8, Ordering};

const OPEN: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
pub struct CommitGate {
    state: AtomicU8,
}

impl CommitGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
        }
    }

    /// Claim the right to persist. False once the caller has cancelled.
    pub fn try_commit(&self) -> bool {
        match self
            .state
            .compare_exchange(OPEN, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == COMMITTED,
        }
    }

    /// Cancel unless the worker already claimed the commit. Returns whether
    /// the gate is now cancelled.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(OPEN, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl Default for CommitGate {
    fn default() -> Self {
        Self::new()
    }
}
