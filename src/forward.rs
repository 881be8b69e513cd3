use crate::{error::Result, event::AllocationEvent, store::ProfileStore};

/// Hands allocation events to the profile store unchanged.
pub struct Forwarder<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ProfileStore + ?Sized> Forwarder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Forwarder { store }
    }

    #[inline]
    pub fn forward(&self, event: &AllocationEvent) -> Result<()> {
        self.store.record_allocation(event)
    }
}
