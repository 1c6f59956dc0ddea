//! Re-entrancy guard held while user handlers run.

use std::cell::Cell;

/// Counts how many handler invocations are currently on the stack.
#[derive(Debug, Default)]
pub(crate) struct Guard {
    depth: Cell<usize>,
}

impl Guard {
    pub(crate) fn is_locked(&self) -> bool {
        self.depth.get() > 0
    }

    pub(crate) fn lock(&self) -> GuardLocker<'_> {
        self.depth.set(self.depth.get() + 1);
        GuardLocker { guard: self }
    }
}

/// Releases its lock when dropped, including during unwinding.
pub(crate) struct GuardLocker<'a> {
    guard: &'a Guard,
}

impl Drop for GuardLocker<'_> {
    fn drop(&mut self) {
        self.guard.depth.set(self.guard.depth.get().saturating_sub(1));
    }
}
