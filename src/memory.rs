//! In-process profile store.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, TryLockError,
    },
};

use log::debug;
use once_cell::sync::OnceCell;

use crate::{
    error::{Error, Result},
    event::{AllocationEvent, ObjectRef, ThreadIdentity},
    profile::{CallStack, Profile},
    state::DEFAULT_SAMPLING_PERIOD,
    store::ProfileStore,
};

const MAX_BACKTRACE: usize = 128;

/// Runs a collection pass and returns the objects it reclaimed.
pub type Collector = Box<dyn Fn() -> Vec<ObjectRef> + Send + Sync>;

#[derive(Default)]
struct Inner {
    profile: Profile,
    // Sampled objects that are still live: address -> (call stack, size).
    live: HashMap<usize, (CallStack, usize)>,
}

/// Profile store that keeps sampled allocations in memory.
///
/// Every `period`-th allocation it sees is sampled: its call stack is
/// captured and the object is tracked until a free event for it arrives.
/// Snapshots are the YAML encoding of a [`Profile`].
///
/// The recording path never waits for the profile lock.  If another thread
/// holds it the sample is dropped and an error returned, which the hook
/// swallows.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    period: AtomicU64,
    seen: AtomicU64,
    collector: OnceCell<Collector>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner::default()),
            period: AtomicU64::new(DEFAULT_SAMPLING_PERIOD),
            seen: AtomicU64::new(0),
            collector: OnceCell::new(),
        }
    }

    /// Register the collection pass run by forced dumps, replacing any
    /// earlier one.
    pub fn with_collector<F>(mut self, collector: F) -> Self
    where
        F: Fn() -> Vec<ObjectRef> + Send + Sync + 'static,
    {
        self.collector = OnceCell::new();
        let _ = self.collector.set(Box::new(collector));
        self
    }

    /// Register the collection pass on a store that is already shared.  Only
    /// one collector can be registered this way.
    pub fn set_collector<F>(&self, collector: F) -> Result<()>
    where
        F: Fn() -> Vec<ObjectRef> + Send + Sync + 'static,
    {
        self.collector
            .set(Box::new(collector))
            .map_err(|_| Error::InvalidArgument("a collector is already registered".to_string()))
    }

    pub fn sampling_period(&self) -> u64 {
        self.period.load(Ordering::Relaxed)
    }

    /// Number of sampled objects currently tracked as live.
    pub fn live_objects(&self) -> Result<usize> {
        Ok(self.lock()?.live.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::StoreUnavailable("profile lock poisoned".to_string()))
    }

    fn try_lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.try_lock().map_err(|e| match e {
            TryLockError::WouldBlock => Error::StoreUnavailable("profile busy".to_string()),
            TryLockError::Poisoned(_) => {
                Error::StoreUnavailable("profile lock poisoned".to_string())
            }
        })
    }

    fn should_sample(&self) -> bool {
        let period = self.period.load(Ordering::Relaxed).max(1);
        self.seen.fetch_add(1, Ordering::Relaxed) % period == 0
    }

    fn capture_callstack() -> CallStack {
        let mut callstack = Vec::with_capacity(MAX_BACKTRACE);
        backtrace::trace(|frame| {
            callstack.push(frame.ip() as usize);
            callstack.len() < MAX_BACKTRACE
        });
        callstack
    }

    fn collect(&self) -> Result<()> {
        let collector = match self.collector.get() {
            Some(collector) => collector,
            None => return Ok(()),
        };
        let reclaimed = collector();
        let mut inner = self.lock()?;
        let mut freed = 0;
        for object in reclaimed {
            if let Some((callstack, size)) = inner.live.remove(&object.addr()) {
                inner.profile.record_free(&callstack, size);
                freed += 1;
            }
        }
        debug!("collection reclaimed {} sampled objects", freed);
        Ok(())
    }
}

impl ProfileStore for MemoryStore {
    fn record_allocation(&self, event: &AllocationEvent) -> Result<()> {
        if !self.should_sample() {
            return Ok(());
        }
        let callstack = Self::capture_callstack();
        let mut inner = self.try_lock()?;
        let size = event.object.size();
        inner
            .profile
            .record_allocation(event.thread, &callstack, size);
        if let Some((old_stack, old_size)) =
            inner.live.insert(event.object.addr(), (callstack, size))
        {
            // The address was reused without us seeing the free.
            inner.profile.record_free(&old_stack, old_size);
        }
        Ok(())
    }

    fn record_free(&self, _thread: ThreadIdentity, object: ObjectRef) -> Result<()> {
        let mut inner = self.try_lock()?;
        if let Some((callstack, size)) = inner.live.remove(&object.addr()) {
            inner.profile.record_free(&callstack, size);
        }
        Ok(())
    }

    fn dump(&self, force_collection: bool) -> Result<Vec<u8>> {
        if force_collection {
            self.collect()?;
        }
        let mut inner = self.lock()?;
        inner.profile.set_sampling_period(self.sampling_period());
        inner.profile.resolve_symbols();
        inner.profile.to_bytes()
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.profile.clear();
        inner.live.clear();
        self.seen.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn configure_sampling_period(&self, period: u64) -> Result<()> {
        if period == 0 {
            return Err(Error::InvalidArgument(
                "sampling period must be positive".to_string(),
            ));
        }
        self.period.store(period, Ordering::Relaxed);
        Ok(())
    }
}
