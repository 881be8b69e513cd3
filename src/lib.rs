//! `heapster` is the allocation-hook core of a sampling heap profiler.  A host
//! runtime instruments its allocation sites so that each of them reports the
//! allocating thread and the new object to an allocation hook.  The hook
//! decides, as cheaply as possible, whether to pass the event on to a profile
//! store, which takes the actual sampling decisions and produces profile
//! snapshots.
//!
//! While profiling is stopped the hook costs a single relaxed load and a
//! branch.  While it runs, a non-blocking reentrancy guard keeps allocations
//! made by the forwarding path itself out of the profile, and failures of the
//! store are logged and counted rather than reported to the allocation site.
//!
//! ## Using `heapster` from Rust
//!
//! Wrap a [`ProfileStore`] in a [`Heapster`], signal readiness once the store
//! is initialized and call the hook from your allocation sites:
//!
//! ```
//! use heapster::{Heapster, MemoryStore, ObjectRef, Profile, ThreadIdentity};
//!
//! let heapster = Heapster::new(MemoryStore::new());
//! heapster.set_ready();
//! heapster.start();
//!
//! let object = Box::new([0u8; 64]);
//! heapster.on_new_object(
//!     ThreadIdentity::current(),
//!     ObjectRef::from_ptr(object.as_ptr(), object.len()),
//! );
//!
//! let snapshot = heapster.dump_profile(false).unwrap();
//! let profile = Profile::from_bytes(snapshot.as_bytes()).unwrap();
//! assert_eq!(profile.total_objects(), 1);
//! ```
//!
//! To profile every heap allocation of a Rust program, configure
//! [`ProfAllocator`] as the global allocator and [`alloc::install`] a
//! profiler backed by a [`MemoryStore`].
//!
//! ## Using `heapster` from other runtimes
//!
//! The companion `lib_heapster` crate builds a dynamic library that exposes
//! the allocation entry point and the control surface (start, stop, sampling
//! period, dump, clear) over the C ABI.  It is configured through `HEAPSTER_*`
//! environment variables, see [`Config`].
//!
//! ## Viewing profiles
//!
//! Snapshots produced by [`MemoryStore`] are YAML-encoded [`Profile`]s.  Use
//! the `hs_print` tool from this crate to merge and display them:
//!
//! ```bash
//! hs_print --input 'heapster.*.yaml' --threshold 0.2
//! ```
//!
//! where `--threshold` is the significance threshold in percent: call stacks
//! holding fewer than `threshold`% of the sampled objects are folded.

pub mod alloc;
pub mod config;
pub mod control;
pub mod dump;
pub mod error;
pub mod event;
pub mod forward;
pub mod guard;
pub mod hook;
pub mod memory;
pub mod profile;
pub mod profiler;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use alloc::ProfAllocator;
pub use config::Config;
pub use dump::ProfileSnapshot;
pub use error::{Error, Result};
pub use event::{AllocationEvent, ObjectRef, ThreadIdentity};
pub use guard::GuardMode;
pub use memory::MemoryStore;
pub use profile::Profile;
pub use profiler::Heapster;
pub use state::{ForwardStats, ProfilerState};
pub use store::ProfileStore;
