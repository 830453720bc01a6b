//! Implements an allocator observer that records live and freed blocks.
//!
//! A host allocator calls the [`MallocSpyHooks`] pairs around every
//! operation. [`MallocSpy`] keeps two collections behind a reader/writer
//! lock: the blocks currently allocated and every block ever freed (as a
//! multiset, since an address can be reused and freed again). Tests query
//! them while the allocator keeps running.
//!
//! # Examples
//! ```
//! use comkit::malloc_spy::{MallocSpy, MallocSpyHooks};
//!
//! let spy = MallocSpy::new();
//! let block = 0x1000 as *mut std::ffi::c_void;
//!
//! spy.post_alloc(block);
//! assert!(spy.is_allocated(block));
//!
//! spy.pre_free(block, true);
//! assert!(!spy.is_allocated(block));
//! assert!(spy.is_deleted(block));
//! ```

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::com::{
    catch_hook, Guid, HResult, RefCount, Unknown, E_INVALIDARG, E_NOINTERFACE, IID_IMALLOCSPY,
    IID_IUNKNOWN, S_OK,
};

/// The allocator-observer contract.
///
/// Every `pre_*` call is followed by its `post_*` counterpart for the same
/// operation. Implementations must pass sizes and pointers through unchanged
/// unless stated otherwise, and must never panic.
pub trait MallocSpyHooks {
    fn pre_alloc(&self, request: usize) -> usize;
    fn post_alloc(&self, actual: *mut c_void) -> *mut c_void;

    fn pre_free(&self, request: *mut c_void, spyed: bool) -> *mut c_void;
    fn post_free(&self, spyed: bool);

    /// `new_request` receives the pointer the allocator should actually
    /// reallocate, when the caller provides a location for it.
    fn pre_realloc(
        &self,
        request: *mut c_void,
        size: usize,
        new_request: Option<&mut *mut c_void>,
        spyed: bool,
    ) -> usize;
    fn post_realloc(&self, actual: *mut c_void, spyed: bool) -> *mut c_void;

    fn pre_get_size(&self, request: *mut c_void, spyed: bool) -> *mut c_void;
    fn post_get_size(&self, actual: usize, spyed: bool) -> usize;

    fn pre_did_alloc(&self, request: *mut c_void, spyed: bool) -> *mut c_void;
    fn post_did_alloc(&self, request: *mut c_void, spyed: bool, actual: i32) -> i32;

    fn pre_heap_minimize(&self);
    fn post_heap_minimize(&self);
}

#[derive(Debug, Default)]
struct SpyState {
    allocated: HashSet<usize>,
    /// Multiset of freed addresses: address -> number of frees.
    deleted: HashMap<usize, usize>,
    deleted_count: usize,
}

impl SpyState {
    fn record_alloc(&mut self, addr: usize) {
        self.allocated.insert(addr);
    }

    fn record_free(&mut self, addr: usize) {
        self.allocated.remove(&addr);
        *self.deleted.entry(addr).or_insert(0) += 1;
        self.deleted_count += 1;
    }
}

/// Test implementation of the allocator observer.
///
/// Constructible on the stack for direct use, or on the heap through
/// [`ComRc`](crate::com::ComRc). A heap spy frees itself on its final
/// `release`, whichever reference that comes through; a stack spy only
/// counts down.
pub struct MallocSpy {
    ref_count: RefCount,
    on_heap: AtomicBool,
    state: RwLock<SpyState>,
}

impl MallocSpy {
    pub fn new() -> Self {
        Self {
            ref_count: RefCount::new(),
            on_heap: AtomicBool::new(false),
            state: RwLock::new(SpyState::default()),
        }
    }

    /// Returns `true` if `ptr` is currently allocated.
    pub fn is_allocated<T: ?Sized>(&self, ptr: *const T) -> bool {
        self.state.read().allocated.contains(&address(ptr))
    }

    /// Returns `true` if `ptr` has been freed at least once.
    pub fn is_deleted<T: ?Sized>(&self, ptr: *const T) -> bool {
        self.state.read().deleted.contains_key(&address(ptr))
    }

    /// Number of blocks currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.state.read().allocated.len()
    }

    /// Number of frees observed, counting repeated frees of one address.
    pub fn deleted_count(&self) -> usize {
        self.state.read().deleted_count
    }

    /// Current COM reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    fn record_alloc(&self, actual: *mut c_void) {
        let addr = address(actual);
        catch_hook(|| self.state.write().record_alloc(addr));
    }

    fn record_free(&self, request: *mut c_void) {
        let addr = address(request);
        catch_hook(|| self.state.write().record_free(addr));
    }
}

fn address<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<u8>() as usize
}

impl Default for MallocSpy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MallocSpy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MallocSpy")
            .field("ref_count", &self.ref_count.get())
            .field("allocated", &state.allocated.len())
            .field("deleted", &state.deleted_count)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unknown
// ---------------------------------------------------------------------------

impl Unknown for MallocSpy {
    fn add_ref(&self) -> u32 {
        self.ref_count.add_ref()
    }

    fn release(&self) -> u32 {
        let count = self.ref_count.release();
        if count == 0 && self.on_heap.load(Ordering::Acquire) {
            trace!(spy = ?(self as *const Self), "destroying heap spy");
            // SAFETY: adopt_heap marked this spy as the content of a leaked
            // box and the last reference just went away.
            unsafe { drop(Box::from_raw(self as *const Self as *mut Self)) };
        }
        count
    }

    fn query_interface(&self, iid: &Guid, object: Option<&mut *mut c_void>) -> HResult {
        let Some(object) = object else {
            return E_INVALIDARG;
        };
        if *iid == IID_IMALLOCSPY || *iid == IID_IUNKNOWN {
            *object = self as *const Self as *mut c_void;
            self.add_ref();
            return S_OK;
        }
        *object = std::ptr::null_mut();
        E_NOINTERFACE
    }

    unsafe fn adopt_heap(&self) {
        self.on_heap.store(true, Ordering::Release);
    }

    fn destroys_itself(&self) -> bool {
        self.on_heap.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// MallocSpyHooks
// ---------------------------------------------------------------------------

impl MallocSpyHooks for MallocSpy {
    fn pre_alloc(&self, request: usize) -> usize {
        request
    }

    fn post_alloc(&self, actual: *mut c_void) -> *mut c_void {
        trace!(ptr = ?actual, "post_alloc");
        self.record_alloc(actual);
        actual
    }

    fn pre_free(&self, request: *mut c_void, _spyed: bool) -> *mut c_void {
        trace!(ptr = ?request, "pre_free");
        self.record_free(request);
        request
    }

    fn post_free(&self, _spyed: bool) {
        // bookkeeping happens in pre_free
    }

    fn pre_realloc(
        &self,
        request: *mut c_void,
        size: usize,
        new_request: Option<&mut *mut c_void>,
        _spyed: bool,
    ) -> usize {
        trace!(ptr = ?request, size, "pre_realloc");
        // The block may move, so the old address is retired either way.
        self.record_free(request);
        if let Some(new_request) = new_request {
            *new_request = request;
        }
        size
    }

    fn post_realloc(&self, actual: *mut c_void, _spyed: bool) -> *mut c_void {
        trace!(ptr = ?actual, "post_realloc");
        self.record_alloc(actual);
        actual
    }

    fn pre_get_size(&self, request: *mut c_void, _spyed: bool) -> *mut c_void {
        request
    }

    fn post_get_size(&self, actual: usize, _spyed: bool) -> usize {
        actual
    }

    fn pre_did_alloc(&self, request: *mut c_void, _spyed: bool) -> *mut c_void {
        request
    }

    fn post_did_alloc(&self, _request: *mut c_void, _spyed: bool, actual: i32) -> i32 {
        actual
    }

    fn pre_heap_minimize(&self) {}

    fn post_heap_minimize(&self) {}
}
