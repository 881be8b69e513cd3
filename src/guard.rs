//! Non-blocking reentrancy guard around the forwarding path.
//!
//! Forwarding an event may itself allocate (building the store's records,
//! capturing a backtrace, formatting a log line).  When the hook is wired to
//! every allocation site those allocations land back in the hook.  The guard
//! marks "currently inside a forward"; any hook invocation that finds it set
//! gives up immediately instead of waiting.

use std::{
    cell::Cell,
    sync::atomic::{AtomicBool, Ordering},
};

thread_local! {
    // Flag used to detect nested calls to the hook on this thread.
    static IN_FORWARD: Cell<bool> = const { Cell::new(false) };
}

/// Where the "inside a forward" flag lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GuardMode {
    /// One flag per thread.  Nested calls on the same thread are suppressed;
    /// other threads are unaffected.
    #[default]
    PerThread,
    /// One flag shared by every thread.  While any thread forwards, events on
    /// all other threads are skipped, and two threads racing on the flag may
    /// both get through or both miss.  Sampling tolerates either outcome.
    Shared,
}

#[derive(Debug)]
pub struct ReentrancyGuard {
    mode: GuardMode,
    shared: AtomicBool,
}

impl ReentrancyGuard {
    pub const fn new(mode: GuardMode) -> Self {
        ReentrancyGuard {
            mode,
            shared: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> GuardMode {
        self.mode
    }

    /// Try to mark the caller as inside a forward.  Returns `None` without
    /// blocking if the flag is already set.  The flag is cleared when the
    /// returned token is dropped.
    pub fn try_enter(&self) -> Option<GuardToken<'_>> {
        match self.mode {
            GuardMode::PerThread => {
                // A thread being torn down has lost its TLS; treat the guard
                // as held so nothing is forwarded from there.
                let entered = IN_FORWARD
                    .try_with(|flag| {
                        if flag.get() {
                            false
                        } else {
                            flag.set(true);
                            true
                        }
                    })
                    .unwrap_or(false);
                if entered {
                    Some(GuardToken { guard: self })
                } else {
                    None
                }
            }
            GuardMode::Shared => {
                // Plain check-then-set: two threads may both get through.
                if self.shared.load(Ordering::Relaxed) {
                    return None;
                }
                self.shared.store(true, Ordering::Relaxed);
                Some(GuardToken { guard: self })
            }
        }
    }

    /// Whether the caller currently observes the guard as held.
    pub fn is_held(&self) -> bool {
        match self.mode {
            GuardMode::PerThread => IN_FORWARD.try_with(Cell::get).unwrap_or(true),
            GuardMode::Shared => self.shared.load(Ordering::Relaxed),
        }
    }

    fn release(&self) {
        match self.mode {
            GuardMode::PerThread => {
                let _ = IN_FORWARD.try_with(|flag| flag.set(false));
            }
            GuardMode::Shared => self.shared.store(false, Ordering::Relaxed),
        }
    }
}

impl Default for ReentrancyGuard {
    fn default() -> Self {
        ReentrancyGuard::new(GuardMode::default())
    }
}

/// Proof of holding the guard.  Releases it on every exit path, including
/// unwinding out of the forwarder.
#[must_use]
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}
