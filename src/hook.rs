//! The entry point called at every instrumented allocation site.

use log::debug;

use crate::{
    event::{AllocationEvent, ObjectRef, ThreadIdentity},
    forward::Forwarder,
    state::{ForwardCounters, ProfilerState},
    store::ProfileStore,
};

/// Allocation hook bound to a profiler state and a store.
///
/// While profiling is off a call costs one relaxed load and a branch.  Nothing
/// the hook does can fail from the caller's point of view: store errors are
/// logged and counted, never returned.
pub struct AllocationHook<'a, S: ?Sized> {
    state: &'a ProfilerState,
    store: &'a S,
}

impl<'a, S: ProfileStore + ?Sized> AllocationHook<'a, S> {
    pub fn new(state: &'a ProfilerState, store: &'a S) -> Self {
        AllocationHook { state, store }
    }

    /// Report that `thread` has just allocated `object`.
    #[inline]
    pub fn on_allocation(&self, thread: ThreadIdentity, object: ObjectRef) {
        if !self.state.is_profiling() {
            return;
        }
        self.forward_allocation(thread, object);
    }

    /// Report that `object` has been released.
    #[inline]
    pub fn on_free(&self, thread: ThreadIdentity, object: ObjectRef) {
        if !self.state.is_profiling() {
            return;
        }
        self.forward_free(thread, object);
    }

    #[inline(never)]
    fn forward_allocation(&self, thread: ThreadIdentity, object: ObjectRef) {
        if !self.state.is_ready() {
            return;
        }
        let _token = match self.state.guard.try_enter() {
            Some(token) => token,
            None => {
                ForwardCounters::bump(&self.state.stats.reentrant);
                return;
            }
        };
        let event = AllocationEvent::new(thread, object);
        match Forwarder::new(self.store).forward(&event) {
            Ok(()) => {
                ForwardCounters::bump(&self.state.stats.forwarded);
                ForwardCounters::add(&self.state.stats.bytes, object.size() as u64);
            }
            Err(e) => {
                ForwardCounters::bump(&self.state.stats.failed);
                // Still under the guard, so allocations made by the logger are
                // not recorded.
                debug!("dropped allocation event {:?}: {}", event, e);
            }
        }
    }

    #[inline(never)]
    fn forward_free(&self, thread: ThreadIdentity, object: ObjectRef) {
        if !self.state.is_ready() {
            return;
        }
        let _token = match self.state.guard.try_enter() {
            Some(token) => token,
            None => {
                ForwardCounters::bump(&self.state.stats.reentrant);
                return;
            }
        };
        match self.store.record_free(thread, object) {
            Ok(()) => ForwardCounters::bump(&self.state.stats.frees),
            Err(e) => {
                ForwardCounters::bump(&self.state.stats.failed);
                debug!("dropped free event for {:#x}: {}", object.addr(), e);
            }
        }
    }
}
