use std::path::Path;

use log::info;

use crate::{
    config::Config,
    control::SamplingController,
    dump::{DumpProtocol, ProfileSnapshot},
    error::Result,
    event::{ObjectRef, ThreadIdentity},
    guard::GuardMode,
    hook::AllocationHook,
    state::{ForwardStats, ProfilerState},
    store::ProfileStore,
};

/// A profile store together with the state that gates it.
///
/// This is the control surface tooling talks to, and the object the
/// allocation entry points are bound to.
pub struct Heapster<S> {
    state: ProfilerState,
    store: S,
}

impl<S: ProfileStore> Heapster<S> {
    pub fn new(store: S) -> Self {
        Heapster {
            state: ProfilerState::default(),
            store,
        }
    }

    pub fn with_guard_mode(store: S, guard_mode: GuardMode, sampling_period: u64) -> Self {
        Heapster {
            state: ProfilerState::new(guard_mode, sampling_period),
            store,
        }
    }

    /// Build a profiler from `config`.  Readiness is still up to the store;
    /// `config.start` only turns profiling on.
    pub fn from_config(store: S, config: &Config) -> Self {
        let heapster = Self::with_guard_mode(store, config.guard_mode, config.sampling_period);
        if config.start {
            heapster.start();
        }
        heapster
    }

    pub fn state(&self) -> &ProfilerState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hook(&self) -> AllocationHook<'_, S> {
        AllocationHook::new(&self.state, &self.store)
    }

    pub fn controller(&self) -> SamplingController<'_, S> {
        SamplingController::new(&self.state, &self.store)
    }

    pub fn dumper(&self) -> DumpProtocol<'_, S> {
        DumpProtocol::new(&self.state, &self.store)
    }

    #[inline]
    pub fn on_new_object(&self, thread: ThreadIdentity, object: ObjectRef) {
        self.hook().on_allocation(thread, object)
    }

    #[inline]
    pub fn on_free_object(&self, thread: ThreadIdentity, object: ObjectRef) {
        self.hook().on_free(thread, object)
    }

    pub fn set_ready(&self) {
        self.controller().set_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn start(&self) {
        self.controller().start()
    }

    pub fn stop(&self) {
        self.controller().stop()
    }

    pub fn is_profiling(&self) -> bool {
        self.state.is_profiling()
    }

    pub fn set_sampling_period(&self, period: i64) -> Result<()> {
        self.controller().set_sampling_period(period)
    }

    pub fn sampling_period(&self) -> u64 {
        self.state.sampling_period()
    }

    pub fn dump_profile(&self, force_collection: bool) -> Result<ProfileSnapshot> {
        self.dumper().dump_profile(force_collection)
    }

    pub fn clear_profile(&self) -> Result<()> {
        self.dumper().clear_profile()
    }

    pub fn dump_profile_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        force_collection: bool,
    ) -> Result<()> {
        self.dumper().dump_profile_to_file(path, force_collection)
    }

    pub fn stats(&self) -> ForwardStats {
        self.state.stats()
    }

    /// Log what the hook has seen so far.
    pub fn report(&self) {
        let _quiet = self.state.guard.try_enter();
        let stats = self.stats();
        info!(
            "forwarded {} allocations ({}B) and {} frees; {} dropped by the store, {} skipped while forwarding",
            stats.forwarded, stats.bytes, stats.frees, stats.failed, stats.reentrant
        );
    }
}
