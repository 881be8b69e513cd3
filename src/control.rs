//! Start/stop and sampling-period control.

use log::{info, warn};

use crate::{
    error::{Error, Result},
    state::ProfilerState,
    store::ProfileStore,
};

pub struct SamplingController<'a, S: ?Sized> {
    state: &'a ProfilerState,
    store: &'a S,
}

impl<'a, S: ProfileStore + ?Sized> SamplingController<'a, S> {
    pub fn new(state: &'a ProfilerState, store: &'a S) -> Self {
        SamplingController { state, store }
    }

    /// Called by the store once it has finished initializing.  Only the
    /// first call has an effect; it also hands the store any sampling period
    /// set while it was not ready yet.
    pub fn set_ready(&self) {
        if !self.state.mark_ready() {
            return;
        }
        let _quiet = self.state.guard.try_enter();
        let period = self.state.sampling_period();
        if let Err(e) = self.store.configure_sampling_period(period) {
            warn!("profile store rejected sampling period {}: {}", period, e);
        }
        info!("profile store ready (sampling period {})", period);
    }

    pub fn start(&self) {
        self.state.set_profiling(true);
        let _quiet = self.state.guard.try_enter();
        info!("allocation profiling started");
    }

    pub fn stop(&self) {
        self.state.set_profiling(false);
        let _quiet = self.state.guard.try_enter();
        info!("allocation profiling stopped");
    }

    /// Change the store's sampling period.  The value is validated here but
    /// otherwise only handed to the store.  On failure the previous period
    /// stays in effect.
    pub fn set_sampling_period(&self, period: i64) -> Result<()> {
        if period <= 0 {
            return Err(Error::InvalidArgument(format!(
                "sampling period must be positive, got {}",
                period
            )));
        }
        let period = period as u64;
        let _quiet = self.state.guard.try_enter();
        // Before readiness the period is only remembered; `set_ready` pushes it.
        if self.state.is_ready() {
            self.store.configure_sampling_period(period)?;
        }
        self.state.set_sampling_period(period);
        info!("sampling period set to {}", period);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStore;
    use std::sync::atomic::Ordering;

    #[test]
    fn start_and_stop_toggle_profiling() {
        let state = ProfilerState::default();
        let store = RecordingStore::new();
        let ctl = SamplingController::new(&state, &store);
        ctl.start();
        assert!(state.is_profiling());
        assert!(!state.is_ready());
        ctl.stop();
        assert!(!state.is_profiling());
    }

    #[test]
    fn non_positive_period_is_rejected() {
        let state = ProfilerState::default();
        let store = RecordingStore::new();
        let ctl = SamplingController::new(&state, &store);
        ctl.set_ready();
        ctl.set_sampling_period(64).unwrap();
        for bad in [0, -1, i64::MIN] {
            match ctl.set_sampling_period(bad) {
                Err(Error::InvalidArgument(_)) => {}
                other => panic!("expected InvalidArgument, got {:?}", other),
            }
        }
        assert_eq!(state.sampling_period(), 64);
        assert_eq!(store.period.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn period_set_before_ready_is_pushed_on_ready() {
        let state = ProfilerState::default();
        let store = RecordingStore::new();
        let ctl = SamplingController::new(&state, &store);
        ctl.set_sampling_period(128).unwrap();
        assert_eq!(store.period.load(Ordering::SeqCst), 0);
        ctl.set_ready();
        assert_eq!(store.period.load(Ordering::SeqCst), 128);

        // A second notification does not reconfigure the store.
        store.period.store(0, Ordering::SeqCst);
        ctl.set_ready();
        assert_eq!(store.period.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn store_failure_keeps_previous_period() {
        let state = ProfilerState::default();
        let store = RecordingStore::new();
        let ctl = SamplingController::new(&state, &store);
        ctl.set_ready();
        ctl.set_sampling_period(10).unwrap();
        store.fail.store(true, Ordering::SeqCst);
        match ctl.set_sampling_period(20) {
            Err(Error::StoreUnavailable(_)) => {}
            other => panic!("expected StoreUnavailable, got {:?}", other),
        }
        assert_eq!(state.sampling_period(), 10);
    }
}
