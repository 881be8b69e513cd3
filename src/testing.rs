// Store doubles shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use crate::{
    error::{Error, Result},
    event::{AllocationEvent, ObjectRef, ThreadIdentity},
    hook::AllocationHook,
    state::ProfilerState,
    store::ProfileStore,
};

#[derive(Default)]
pub(crate) struct RecordingStore {
    pub(crate) events: Mutex<Vec<AllocationEvent>>,
    pub(crate) frees: AtomicUsize,
    pub(crate) fail: AtomicBool,
    pub(crate) period: AtomicU64,
    pub(crate) clears: AtomicUsize,
    pub(crate) collections: AtomicUsize,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        let store = Self::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub(crate) fn recorded(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ProfileStore for RecordingStore {
    fn record_allocation(&self, event: &AllocationEvent) -> Result<()> {
        self.check()?;
        self.events.lock().unwrap().push(*event);
        Ok(())
    }

    fn record_free(&self, _thread: ThreadIdentity, _object: ObjectRef) -> Result<()> {
        self.check()?;
        self.frees.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dump(&self, force_collection: bool) -> Result<Vec<u8>> {
        self.check()?;
        if force_collection {
            self.collections.fetch_add(1, Ordering::SeqCst);
        }
        Ok(format!("{} events", self.recorded()).into_bytes())
    }

    fn clear(&self) -> Result<()> {
        self.check()?;
        self.events.lock().unwrap().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn configure_sampling_period(&self, period: u64) -> Result<()> {
        self.check()?;
        self.period.store(period, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose recording path "allocates": it calls back into the hook with
/// the same state, like a forwarder running under an instrumented allocator.
pub(crate) struct ReentrantStore {
    pub(crate) state: Arc<ProfilerState>,
    pub(crate) outer: AtomicUsize,
    pub(crate) inner: RecordingStore,
}

impl ReentrantStore {
    pub(crate) fn new(state: Arc<ProfilerState>) -> Self {
        ReentrantStore {
            state,
            outer: AtomicUsize::new(0),
            inner: RecordingStore::new(),
        }
    }
}

impl ProfileStore for ReentrantStore {
    fn record_allocation(&self, event: &AllocationEvent) -> Result<()> {
        self.outer.fetch_add(1, Ordering::SeqCst);
        AllocationHook::new(&self.state, &self.inner).on_allocation(event.thread, event.object);
        Ok(())
    }

    fn dump(&self, force_collection: bool) -> Result<Vec<u8>> {
        self.inner.dump(force_collection)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn configure_sampling_period(&self, period: u64) -> Result<()> {
        self.inner.configure_sampling_period(period)
    }
}

pub(crate) fn object(addr: usize) -> ObjectRef {
    ObjectRef::new(addr, 16)
}
