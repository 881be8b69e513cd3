//! Companion crate to [`heapster`].  This crate compiles into a dynamic library
//! that a host runtime loads next to its instrumentation.  Instrumented
//! allocation sites call [`heapster_new_object`]; management tooling drives
//! the profiler through the remaining `heapster_*` functions.
//!
//! The profiler is backed by a [`MemoryStore`] and configured from the
//! `HEAPSTER_*` environment variables (see [`heapster::Config`]).  Control
//! functions return `0` on success or a negative [`heapster::Error::code`].
//!
//! Runtimes with a garbage collector register their collection pass with
//! [`heapster_set_collector`] so that forced dumps only show live objects.

use std::{ffi::CStr, ffi::OsStr, os::unix::ffi::OsStrExt, path::PathBuf, ptr};

use heapster::{error::code, Config, Error, Heapster, MemoryStore, ObjectRef, ThreadIdentity};
use libc::{c_char, c_int, c_void, size_t};
use log::warn;
use once_cell::sync::{Lazy, OnceCell};

static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

static HEAPSTER: OnceCell<Heapster<MemoryStore>> = OnceCell::new();

fn profiler() -> &'static Heapster<MemoryStore> {
    HEAPSTER.get_or_init(|| Heapster::from_config(MemoryStore::new(), &CONFIG))
}

fn status(res: heapster::Result<()>) -> c_int {
    match res {
        Ok(()) => code::SUCCESS,
        Err(e) => {
            warn!("heapster: {}", e);
            e.code()
        }
    }
}

/// Initialize the profile store and mark the profiler ready.  Allocation
/// events reported before this call are ignored.
#[no_mangle]
pub extern "C" fn heapster_init() -> c_int {
    let _ = env_logger::try_init();
    profiler().set_ready();
    code::SUCCESS
}

/// Report that `thread` has just allocated the object at `object`.
///
/// Never fails and never blocks; a zero `thread` is ignored.
#[no_mangle]
pub extern "C" fn heapster_new_object(thread: u64, object: *const c_void, size: size_t) {
    if thread == 0 {
        return;
    }
    if let Some(heapster) = HEAPSTER.get() {
        heapster.on_new_object(ThreadIdentity::new(thread), ObjectRef::from_ptr(object, size));
    }
}

/// Report that the object at `object` has been reclaimed.  As with
/// [`heapster_new_object`], a zero `thread` is ignored.
#[no_mangle]
pub extern "C" fn heapster_free_object(thread: u64, object: *const c_void, size: size_t) {
    if thread == 0 {
        return;
    }
    if let Some(heapster) = HEAPSTER.get() {
        heapster.on_free_object(ThreadIdentity::new(thread), ObjectRef::from_ptr(object, size));
    }
}

/// Collection pass supplied by the host.  It is called with the `ctx` given
/// to [`heapster_set_collector`] and reports every object it reclaimed by
/// passing `sink` to [`heapster_collector_reclaimed`].
pub type HeapsterCollectFn = extern "C" fn(ctx: *mut c_void, sink: *mut c_void);

struct HostContext(*mut c_void);

// The host owns `ctx` and promises it may be used from any thread.
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

impl HostContext {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Register the collection pass that forced dumps run before taking the
/// snapshot.  Only one collector can be registered.
#[no_mangle]
pub extern "C" fn heapster_set_collector(
    collect: Option<HeapsterCollectFn>,
    ctx: *mut c_void,
) -> c_int {
    let collect = match collect {
        Some(collect) => collect,
        None => {
            return status(Err(Error::InvalidArgument(
                "collector must not be NULL".to_string(),
            )))
        }
    };
    let ctx = HostContext(ctx);
    status(profiler().store().set_collector(move || {
        let mut reclaimed: Vec<ObjectRef> = Vec::new();
        collect(ctx.get(), &mut reclaimed as *mut Vec<ObjectRef> as *mut c_void);
        reclaimed
    }))
}

/// Report one object reclaimed by the running collection pass.
///
/// # Safety
///
/// `sink` must be the value passed to the [`HeapsterCollectFn`] that is
/// currently running.
#[no_mangle]
pub unsafe extern "C" fn heapster_collector_reclaimed(
    sink: *mut c_void,
    object: *const c_void,
    size: size_t,
) {
    if sink.is_null() {
        return;
    }
    let reclaimed = &mut *(sink as *mut Vec<ObjectRef>);
    reclaimed.push(ObjectRef::from_ptr(object, size));
}

/// Identity of the calling thread, for callers that have no thread handle of
/// their own to pass to [`heapster_new_object`].
#[no_mangle]
pub extern "C" fn heapster_current_thread() -> u64 {
    ThreadIdentity::current().as_u64()
}

#[no_mangle]
pub extern "C" fn heapster_start() {
    profiler().start();
}

#[no_mangle]
pub extern "C" fn heapster_stop() {
    profiler().stop();
}

#[no_mangle]
pub extern "C" fn heapster_set_sampling_period(period: c_int) -> c_int {
    status(profiler().set_sampling_period(period as i64))
}

#[no_mangle]
pub extern "C" fn heapster_clear_profile() -> c_int {
    status(profiler().clear_profile())
}

/// Dump the profile into a newly allocated buffer.  On success the buffer's
/// length is stored in `*len` and the buffer must be released with
/// [`heapster_free_snapshot`].  Returns NULL on failure.
///
/// # Safety
///
/// `len` must be NULL or point to writable memory for a `size_t`.
#[no_mangle]
pub unsafe extern "C" fn heapster_dump_profile(
    force_collection: bool,
    len: *mut size_t,
) -> *mut u8 {
    if len.is_null() {
        return ptr::null_mut();
    }
    match profiler().dump_profile(force_collection) {
        Ok(snapshot) => {
            let bytes = snapshot.into_bytes().into_boxed_slice();
            *len = bytes.len();
            Box::into_raw(bytes) as *mut u8
        }
        Err(e) => {
            warn!("heapster: {}", e);
            *len = 0;
            ptr::null_mut()
        }
    }
}

/// Release a buffer returned by [`heapster_dump_profile`].
///
/// # Safety
///
/// `buf` and `len` must come from a single successful call to
/// [`heapster_dump_profile`], and the buffer must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn heapster_free_snapshot(buf: *mut u8, len: size_t) {
    if buf.is_null() {
        return;
    }
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buf, len)));
}

/// Dump the profile to `path`, replacing any existing file.  A NULL `path`
/// selects `HEAPSTER_DUMP_PATH`.
///
/// # Safety
///
/// `path` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn heapster_dump_profile_to_file(
    path: *const c_char,
    force_collection: bool,
) -> c_int {
    let path = if path.is_null() {
        CONFIG.dump_path.clone()
    } else {
        PathBuf::from(OsStr::from_bytes(CStr::from_ptr(path).to_bytes()))
    };
    status(profiler().dump_profile_to_file(path, force_collection))
}

/// Stop profiling, log the hook's counters and, with
/// `HEAPSTER_DUMP_ON_EXIT` set, write a final snapshot to
/// `HEAPSTER_DUMP_PATH`.
#[no_mangle]
pub extern "C" fn heapster_shutdown() -> c_int {
    let heapster = match HEAPSTER.get() {
        Some(heapster) => heapster,
        None => return code::SUCCESS,
    };
    heapster.stop();
    heapster.report();
    if CONFIG.dump_on_exit {
        return status(heapster.dump_profile_to_file(&CONFIG.dump_path, true));
    }
    code::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapster::Profile;
    use std::ffi::CString;

    extern "C" fn reclaim_ctx(ctx: *mut c_void, sink: *mut c_void) {
        unsafe { heapster_collector_reclaimed(sink, ctx, 32) };
    }

    fn dump(force_collection: bool) -> Profile {
        let mut len: size_t = 0;
        let buf = unsafe { heapster_dump_profile(force_collection, &mut len) };
        assert!(!buf.is_null());
        let bytes = unsafe { std::slice::from_raw_parts(buf, len) }.to_vec();
        unsafe { heapster_free_snapshot(buf, len) };
        Profile::from_bytes(&bytes).unwrap()
    }

    // The library keeps one process-wide profiler, so the whole lifecycle is
    // exercised in a single test.
    #[test]
    fn lifecycle_over_c_abi() {
        let thread = heapster_current_thread();
        let objects = vec![0u64; 4];
        let obj = objects.as_ptr() as *const c_void;

        // Before init: events are ignored and dumps fail.
        heapster_start();
        heapster_new_object(thread, obj, 32);
        let mut len: size_t = 0;
        assert!(unsafe { heapster_dump_profile(false, &mut len) }.is_null());
        assert_eq!(heapster_clear_profile(), code::NOT_READY);

        assert_eq!(heapster_init(), code::SUCCESS);
        assert_eq!(heapster_set_sampling_period(0), code::INVALID_ARGUMENT);
        assert_eq!(heapster_set_sampling_period(1), code::SUCCESS);

        heapster_new_object(thread, obj, 32);
        heapster_new_object(0, obj, 32);
        heapster_new_object(thread, unsafe { obj.add(8) }, 32);

        assert_eq!(dump(true).total_objects(), 2);

        heapster_free_object(thread, obj, 32);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        assert_eq!(
            unsafe { heapster_dump_profile_to_file(c_path.as_ptr(), true) },
            code::SUCCESS
        );
        assert_eq!(Profile::from_file(&path).unwrap().total_objects(), 1);

        // Frees from an unknown thread are ignored like allocations.
        let second = unsafe { obj.add(8) };
        heapster_free_object(0, second, 32);
        assert_eq!(dump(false).total_objects(), 1);

        // A forced dump runs the host's collection pass first.
        assert_eq!(
            heapster_set_collector(None, ptr::null_mut()),
            code::INVALID_ARGUMENT
        );
        assert_eq!(
            heapster_set_collector(Some(reclaim_ctx), second as *mut c_void),
            code::SUCCESS
        );
        assert_eq!(
            heapster_set_collector(Some(reclaim_ctx), ptr::null_mut()),
            code::INVALID_ARGUMENT
        );
        assert_eq!(dump(false).total_objects(), 1);
        assert_eq!(dump(true).total_objects(), 0);

        let bad_path = CString::new("/nonexistent-dir/out.yaml").unwrap();
        assert_eq!(
            unsafe { heapster_dump_profile_to_file(bad_path.as_ptr(), false) },
            code::IO_ERROR
        );

        assert_eq!(heapster_clear_profile(), code::SUCCESS);
        heapster_stop();
        heapster_new_object(thread, obj, 32);
        assert_eq!(heapster_shutdown(), code::SUCCESS);
    }
}
