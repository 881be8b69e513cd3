//! Interface to the profile store that consumes forwarded events.

use crate::{
    error::Result,
    event::{AllocationEvent, ObjectRef, ThreadIdentity},
};

/// The component that makes the actual sampling decisions, keeps the
/// recorded allocations and encodes snapshots.
///
/// `record_allocation` and `record_free` run on the allocation path of
/// arbitrary threads and must not block.  Failing is fine: the hook drops
/// the event.
pub trait ProfileStore: Send + Sync {
    fn record_allocation(&self, event: &AllocationEvent) -> Result<()>;

    fn record_free(&self, _thread: ThreadIdentity, _object: ObjectRef) -> Result<()> {
        Ok(())
    }

    /// Produce a snapshot of the recorded profile.  With `force_collection`
    /// the store first runs a collection pass so that the snapshot only
    /// covers live objects.
    fn dump(&self, force_collection: bool) -> Result<Vec<u8>>;

    fn clear(&self) -> Result<()>;

    fn configure_sampling_period(&self, period: u64) -> Result<()>;
}

impl<S: ProfileStore + ?Sized> ProfileStore for Box<S> {
    fn record_allocation(&self, event: &AllocationEvent) -> Result<()> {
        (**self).record_allocation(event)
    }

    fn record_free(&self, thread: ThreadIdentity, object: ObjectRef) -> Result<()> {
        (**self).record_free(thread, object)
    }

    fn dump(&self, force_collection: bool) -> Result<Vec<u8>> {
        (**self).dump(force_collection)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn configure_sampling_period(&self, period: u64) -> Result<()> {
        (**self).configure_sampling_period(period)
    }
}
