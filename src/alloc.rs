//! Global allocator adapter: feeds every Rust heap allocation of the process
//! to an installed [`Heapster`].

use std::alloc::{GlobalAlloc, Layout, System};

use once_cell::sync::OnceCell;

use crate::{
    error::{Error, Result},
    event::{ObjectRef, ThreadIdentity},
    memory::MemoryStore,
    profiler::Heapster,
    store::ProfileStore,
};

static PROFILER: OnceCell<Heapster<MemoryStore>> = OnceCell::new();

/// Make `heapster` the process-wide profiler seen by [`ProfAllocator`].
/// Can only be done once.
pub fn install(heapster: Heapster<MemoryStore>) -> Result<&'static Heapster<MemoryStore>> {
    PROFILER
        .set(heapster)
        .map_err(|_| Error::InvalidArgument("a profiler is already installed".to_string()))?;
    installed().ok_or_else(|| Error::StoreUnavailable("profiler not installed".to_string()))
}

pub fn installed() -> Option<&'static Heapster<MemoryStore>> {
    PROFILER.get()
}

/// Allocator that reports allocations and frees to the installed profiler
/// before handing them to [`System`].  Until [`install`] is called it is a
/// plain passthrough.
///
/// ```
/// use heapster::ProfAllocator;
///
/// #[global_allocator]
/// static GLOBAL: ProfAllocator = ProfAllocator;
///
/// fn main() {}
/// ```
pub struct ProfAllocator;

impl ProfAllocator {
    #[inline]
    fn on_alloc(ptr: *mut u8, size: usize) {
        if let Some(heapster) = PROFILER.get() {
            report_alloc(heapster, ptr, size, ThreadIdentity::current);
        }
    }

    #[inline]
    fn on_dealloc(ptr: *mut u8, size: usize) {
        if let Some(heapster) = PROFILER.get() {
            report_dealloc(heapster, ptr, size, ThreadIdentity::current);
        }
    }
}

// The calling thread is only looked up once profiling is known to be on.
#[inline]
fn report_alloc<S, F>(heapster: &Heapster<S>, ptr: *mut u8, size: usize, thread: F)
where
    S: ProfileStore,
    F: FnOnce() -> ThreadIdentity,
{
    if ptr.is_null() || !heapster.is_profiling() {
        return;
    }
    heapster.on_new_object(thread(), ObjectRef::from_ptr(ptr, size));
}

#[inline]
fn report_dealloc<S, F>(heapster: &Heapster<S>, ptr: *mut u8, size: usize, thread: F)
where
    S: ProfileStore,
    F: FnOnce() -> ThreadIdentity,
{
    if !heapster.is_profiling() {
        return;
    }
    heapster.on_free_object(thread(), ObjectRef::from_ptr(ptr, size));
}

unsafe impl GlobalAlloc for ProfAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        Self::on_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        Self::on_dealloc(ptr, layout.size());
        System.dealloc(ptr, layout);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        Self::on_alloc(ptr, layout.size());
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            Self::on_dealloc(ptr, layout.size());
            Self::on_alloc(new_ptr, new_size);
        }
        new_ptr
    }
}
