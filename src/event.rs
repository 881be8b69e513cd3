//! Values that travel from an allocation site to the profile store.

use libc::pthread_self;

/// Identity of the thread that performed an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadIdentity(u64);

impl ThreadIdentity {
    pub const fn new(id: u64) -> Self {
        ThreadIdentity(id)
    }

    /// Identity of the calling thread.
    pub fn current() -> Self {
        ThreadIdentity(unsafe { pthread_self() } as u64)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Non-owning handle to an allocated object.
///
/// The handle only carries the object's address and the size the producer
/// reported for it.  It is never dereferenced, so holding one neither keeps
/// the object alive nor touches its memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    addr: usize,
    size: usize,
}

impl ObjectRef {
    pub const fn new(addr: usize, size: usize) -> Self {
        ObjectRef { addr, size }
    }

    pub fn from_ptr<T>(ptr: *const T, size: usize) -> Self {
        ObjectRef::new(ptr as usize, size)
    }

    pub const fn addr(&self) -> usize {
        self.addr
    }

    pub const fn size(&self) -> usize {
        self.size
    }
}

/// A single allocation observed by the hook.  Lives only for the duration of
/// the hook call that forwards it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationEvent {
    pub thread: ThreadIdentity,
    pub object: ObjectRef,
}

impl AllocationEvent {
    pub const fn new(thread: ThreadIdentity, object: ObjectRef) -> Self {
        AllocationEvent { thread, object }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::spawn;

    #[test]
    fn current_thread_identity_is_stable() {
        assert_eq!(ThreadIdentity::current(), ThreadIdentity::current());
    }

    #[test]
    fn threads_have_distinct_identities() {
        let main = ThreadIdentity::current();
        // pthread ids may be reused once a thread exits, so keep the worker
        // alive until the comparison is done.
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let handle = spawn(move || {
            tx.send(ThreadIdentity::current()).unwrap();
            done_rx.recv().unwrap();
        });
        let worker = rx.recv().unwrap();
        assert_ne!(main, worker);
        done_tx.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn object_ref_from_pointer() {
        let value = Box::new(42u64);
        let ptr: *const u64 = &*value;
        let obj = ObjectRef::from_ptr(ptr, std::mem::size_of::<u64>());
        assert_eq!(obj.addr(), ptr as usize);
        assert_eq!(obj.size(), 8);
    }
}
