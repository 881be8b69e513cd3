//! Flags shared by the allocation hook and the control operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::guard::{GuardMode, ReentrancyGuard};

pub const DEFAULT_SAMPLING_PERIOD: u64 = 1;

/// Profiler-wide state.  Created once when the profiler attaches and shared
/// by reference with every hook invocation.
///
/// All flags use relaxed ordering: another thread may observe `start()` or
/// `stop()` a few allocations late, which only costs a few samples.
#[derive(Debug)]
pub struct ProfilerState {
    ready: AtomicBool,
    profiling: AtomicBool,
    sampling_period: AtomicU64,
    pub(crate) guard: ReentrancyGuard,
    pub(crate) stats: ForwardCounters,
}

impl ProfilerState {
    pub fn new(guard_mode: GuardMode, sampling_period: u64) -> Self {
        ProfilerState {
            ready: AtomicBool::new(false),
            profiling: AtomicBool::new(false),
            sampling_period: AtomicU64::new(sampling_period.max(1)),
            guard: ReentrancyGuard::new(guard_mode),
            stats: ForwardCounters::default(),
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    pub fn sampling_period(&self) -> u64 {
        self.sampling_period.load(Ordering::Relaxed)
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats.snapshot()
    }

    // Returns `true` on the false -> true transition only.
    pub(crate) fn mark_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::Relaxed)
    }

    pub(crate) fn set_profiling(&self, on: bool) {
        self.profiling.store(on, Ordering::Relaxed);
    }

    pub(crate) fn set_sampling_period(&self, period: u64) {
        self.sampling_period.store(period, Ordering::Relaxed);
    }
}

impl Default for ProfilerState {
    fn default() -> Self {
        ProfilerState::new(GuardMode::default(), DEFAULT_SAMPLING_PERIOD)
    }
}

// Tallies kept by the hook.  Increments are relaxed and the totals are only
// approximate under concurrent allocation.
#[derive(Debug, Default)]
pub(crate) struct ForwardCounters {
    pub(crate) forwarded: AtomicU64,
    pub(crate) bytes: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) reentrant: AtomicU64,
    pub(crate) frees: AtomicU64,
}

impl ForwardCounters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ForwardStats {
        ForwardStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reentrant: self.reentrant.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the hook's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Allocation events handed to the store.
    pub forwarded: u64,
    /// Total size of the forwarded allocations.
    pub bytes: u64,
    /// Forwards the store rejected.  The failure was swallowed.
    pub failed: u64,
    /// Events dropped because the guard was already held.
    pub reentrant: u64,
    /// Free events handed to the store.
    pub frees: u64,
}
