//! Snapshot and reset of the recorded profile.

use std::{fs, path::Path};

use log::{debug, info};

use crate::{
    error::{Error, Result},
    state::ProfilerState,
    store::ProfileStore,
};

/// Bytes produced by the profile store.  Written out verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileSnapshot(Vec<u8>);

impl ProfileSnapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        ProfileSnapshot(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Create or truncate `path` and write the snapshot to it.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, &self.0)?;
        Ok(())
    }
}

impl AsRef<[u8]> for ProfileSnapshot {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub struct DumpProtocol<'a, S: ?Sized> {
    state: &'a ProfilerState,
    store: &'a S,
}

impl<'a, S: ProfileStore + ?Sized> DumpProtocol<'a, S> {
    pub fn new(state: &'a ProfilerState, store: &'a S) -> Self {
        DumpProtocol { state, store }
    }

    pub fn dump_profile(&self, force_collection: bool) -> Result<ProfileSnapshot> {
        if !self.state.is_ready() {
            return Err(Error::StoreUnavailable(
                "profile store has not signaled readiness".to_string(),
            ));
        }
        let _quiet = self.state.guard.try_enter();
        let snapshot = ProfileSnapshot::new(self.store.dump(force_collection)?);
        debug!(
            "dumped profile: {} bytes (forced collection: {})",
            snapshot.len(),
            force_collection
        );
        Ok(snapshot)
    }

    /// Discard the store's accumulated data.  Profiling and readiness are
    /// left as they are.
    pub fn clear_profile(&self) -> Result<()> {
        if !self.state.is_ready() {
            return Err(Error::NotReady);
        }
        let _quiet = self.state.guard.try_enter();
        self.store.clear()?;
        info!("profile cleared");
        Ok(())
    }

    /// Dump the profile and write it to `path`, replacing any existing file.
    /// A failed write may leave a partial file behind.
    pub fn dump_profile_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        force_collection: bool,
    ) -> Result<()> {
        let snapshot = self.dump_profile(force_collection)?;
        let _quiet = self.state.guard.try_enter();
        snapshot.write_to(path.as_ref())?;
        info!(
            "wrote {} byte profile to {}",
            snapshot.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::ThreadIdentity,
        hook::AllocationHook,
        testing::{object, RecordingStore},
    };
    use std::sync::atomic::Ordering;

    fn ready_state() -> ProfilerState {
        let state = ProfilerState::default();
        state.mark_ready();
        state
    }

    #[test]
    fn dump_before_ready_is_unavailable() {
        let state = ProfilerState::default();
        let store = RecordingStore::new();
        let dump = DumpProtocol::new(&state, &store);
        assert!(matches!(
            dump.dump_profile(false),
            Err(Error::StoreUnavailable(_))
        ));
        assert!(matches!(dump.clear_profile(), Err(Error::NotReady)));
    }

    #[test]
    fn forced_dump_requests_collection() {
        let state = ready_state();
        let store = RecordingStore::new();
        let dump = DumpProtocol::new(&state, &store);
        dump.dump_profile(false).unwrap();
        assert_eq!(store.collections.load(Ordering::SeqCst), 0);
        dump.dump_profile(true).unwrap();
        assert_eq!(store.collections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_then_dump_is_empty() {
        let state = ready_state();
        state.set_profiling(true);
        let store = RecordingStore::new();
        let hook = AllocationHook::new(&state, &store);
        for addr in 0..5 {
            hook.on_allocation(ThreadIdentity::current(), object(addr));
        }
        let dump = DumpProtocol::new(&state, &store);
        assert_eq!(dump.dump_profile(false).unwrap().as_bytes(), b"5 events");
        dump.clear_profile().unwrap();
        assert_eq!(dump.dump_profile(false).unwrap().as_bytes(), b"0 events");
        assert!(state.is_profiling());
        assert!(state.is_ready());
    }

    #[test]
    fn store_failure_surfaces() {
        let state = ready_state();
        let store = RecordingStore::failing();
        let dump = DumpProtocol::new(&state, &store);
        assert!(matches!(
            dump.dump_profile(true),
            Err(Error::StoreUnavailable(_))
        ));
        assert!(matches!(
            dump.clear_profile(),
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[test]
    fn file_matches_dump() {
        let state = ready_state();
        state.set_profiling(true);
        let store = RecordingStore::new();
        AllocationHook::new(&state, &store).on_allocation(ThreadIdentity::current(), object(1));
        let dump = DumpProtocol::new(&state, &store);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"stale contents that are longer than the dump").unwrap();
        dump.dump_profile_to_file(&path, true).unwrap();
        let expected = dump.dump_profile(true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), expected.as_bytes());
    }

    #[test]
    fn unwritable_path_is_io_error() {
        let state = ready_state();
        let store = RecordingStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        match DumpProtocol::new(&state, &store).dump_profile_to_file(&path, false) {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io error, got {:?}", other),
        }
    }
}
