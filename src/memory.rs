//! Tracks allocations made through the global allocator.
//!
//! [`TrackingAllocator`] wraps another allocator (usually [`System`]) and
//! fills fresh blocks with [`UNINITIALIZED_PATTERN`] and released blocks with
//! [`FREED_PATTERN`]. While tracking is on, every release is checked against
//! the addresses a test asked the [`Tracker`] to watch, so the test can later
//! assert that a pointer was actually freed.
//!
//! Install the allocator once per test binary:
//!
//! ```ignore
//! comkit::install_tracking_allocator!();
//!
//! #[test]
//! fn value_is_freed() {
//!     let value = Box::new(7u64);
//!     let ptr: *const u64 = &*value;
//!     comkit::memory::start_tracking(ptr);
//!     drop(value);
//!     comkit::expect_deleted!(ptr);
//!     comkit::memory::stop_tracking();
//! }
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::com::{catch_hook, MutexExt};
use crate::error::{Error, Result};

/// Byte written over every fresh allocation.
pub const UNINITIALIZED_PATTERN: u8 = 0xCD;

/// Byte written over every block before it is released.
pub const FREED_PATTERN: u8 = 0xDD;

thread_local! {
    // Set while this thread holds the tracker lock. Allocator calls made from
    // inside bookkeeping must not try to take it again.
    static IN_BOOKKEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Runs `body` unless this thread is already inside tracker bookkeeping.
fn enter_bookkeeping<R>(body: impl FnOnce() -> R) -> Option<R> {
    struct Exit;

    impl Drop for Exit {
        fn drop(&mut self) {
            let _ = IN_BOOKKEEPING.try_with(|flag| flag.set(false));
        }
    }

    let entered = IN_BOOKKEEPING
        .try_with(|flag| !flag.replace(true))
        .unwrap_or(false);
    if !entered {
        return None;
    }
    let _exit = Exit;
    Some(body())
}

fn address<T: ?Sized>(ptr: *const T) -> usize {
    ptr.cast::<u8>() as usize
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TrackedSets {
    tracked: BTreeSet<usize>,
    deleted: BTreeSet<usize>,
}

/// Process-wide record of which watched addresses have been released.
///
/// There is exactly one instance, reached through [`tracker()`].
#[derive(Debug)]
pub struct Tracker {
    enabled: AtomicBool,
    sets: Mutex<TrackedSets>,
}

static TRACKER: Tracker = Tracker::new();

/// Returns the process-wide tracker.
///
/// # Examples
/// ```
/// let tracker = comkit::memory::tracker();
/// assert!(std::ptr::eq(tracker, comkit::memory::tracker()));
/// ```
pub fn tracker() -> &'static Tracker {
    &TRACKER
}

impl Tracker {
    const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sets: Mutex::new(TrackedSets {
                tracked: BTreeSet::new(),
                deleted: BTreeSet::new(),
            }),
        }
    }

    /// Enables tracking and adds `ptr` to the watched addresses.
    pub fn start<T: ?Sized>(&self, ptr: *const T) {
        self.enabled.store(true, Ordering::Release);
        self.with_sets(|sets| {
            sets.tracked.insert(address(ptr));
        });
    }

    /// Disables tracking and forgets every watched and released address.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
        self.clear();
    }

    /// Forgets every watched and released address without changing whether
    /// tracking is enabled.
    pub fn reset(&self) {
        self.clear();
    }

    pub fn is_tracking(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `true` if `ptr` was released while tracked.
    pub fn is_deleted<T: ?Sized>(&self, ptr: *const T) -> bool {
        let addr = address(ptr);
        self.with_sets(|sets| sets.deleted.contains(&addr))
            .unwrap_or(false)
    }

    pub fn tracked_count(&self) -> usize {
        self.with_sets(|sets| sets.tracked.len()).unwrap_or(0)
    }

    pub fn deleted_count(&self) -> usize {
        self.with_sets(|sets| sets.deleted.len()).unwrap_or(0)
    }

    /// Deallocation hook: records `ptr` if it is being watched.
    ///
    /// Never panics and never blocks when tracking is off.
    pub fn record_release<T: ?Sized>(&self, ptr: *const T) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let addr = address(ptr);
        self.with_sets(|sets| {
            if sets.tracked.contains(&addr) {
                sets.deleted.insert(addr);
            }
        });
    }

    fn clear(&self) {
        self.with_sets(|sets| {
            sets.tracked.clear();
            sets.deleted.clear();
        });
    }

    /// Locks the sets for `body`. Failures (re-entrancy, poisoning, panics)
    /// yield `None`.
    fn with_sets<R>(&self, body: impl FnOnce(&mut TrackedSets) -> R) -> Option<R> {
        enter_bookkeeping(|| {
            catch_hook(|| {
                let mut sets = self.sets.lock_or_fail().ok()?;
                Some(body(&mut sets))
            })
            .flatten()
        })
        .flatten()
    }
}

/// Shorthand for `tracker().start(ptr)`.
pub fn start_tracking<T: ?Sized>(ptr: *const T) {
    tracker().start(ptr);
}

/// Shorthand for `tracker().stop()`.
pub fn stop_tracking() {
    tracker().stop();
}

/// Shorthand for `tracker().is_deleted(ptr)`.
pub fn is_deleted<T: ?Sized>(ptr: *const T) -> bool {
    tracker().is_deleted(ptr)
}

/// Returns `true` if the first four bytes at `ptr` still hold the
/// allocation fill pattern.
///
/// # Safety
///
/// `ptr` must point to at least four readable bytes.
pub unsafe fn is_uninitialized<T: ?Sized>(ptr: *const T) -> bool {
    let word = ptr.cast::<u32>().read_unaligned();
    word == u32::from_ne_bytes([UNINITIALIZED_PATTERN; 4])
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Global allocator that poisons memory and reports releases to the
/// [`Tracker`].
///
/// # Examples
/// ```
/// use std::alloc::Layout;
///
/// use comkit::memory::{is_uninitialized, TrackingAllocator};
///
/// let allocator = TrackingAllocator::system();
/// let layout = Layout::new::<u32>();
/// let block = allocator.allocate(layout).expect("allocation should succeed");
/// assert!(unsafe { is_uninitialized(block.as_ptr()) });
/// unsafe { allocator.deallocate(block, layout) };
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator<A = System> {
    inner: A,
}

impl TrackingAllocator<System> {
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: GlobalAlloc> TrackingAllocator<A> {
    /// Allocates a poisoned block, reporting exhaustion as an error.
    ///
    /// Zero-sized layouts get a dangling, well-aligned pointer.
    ///
    /// # Errors
    /// Returns [`Error::OutOfMemory`] if the inner allocator fails.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            // Alignment is a non-zero power of two.
            return Ok(NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling()));
        }
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { self.alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| Error::out_of_memory(layout))
    }

    /// Releases a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            self.dealloc(ptr.as_ptr(), layout);
        }
    }
}

// SAFETY: every block comes from and goes back to `inner` with the caller's
// layout; the extra work only writes inside the block.
unsafe impl<A: GlobalAlloc> GlobalAlloc for TrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            ptr::write_bytes(ptr, UNINITIALIZED_PATTERN, layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        tracker().record_release(ptr);
        ptr::write_bytes(ptr, FREED_PATTERN, layout.size());
        self.inner.dealloc(ptr, layout);
    }
}

/// Installs a [`TrackingAllocator`] over [`System`] as the global allocator.
///
/// Must be invoked exactly once per binary, at module scope.
#[macro_export]
macro_rules! install_tracking_allocator {
    () => {
        #[global_allocator]
        static COMKIT_TRACKING_ALLOCATOR: $crate::memory::TrackingAllocator =
            $crate::memory::TrackingAllocator::system();
    };
}

/// Fails the test unless `ptr` points at freshly allocated, unwritten memory.
///
/// `ptr` must point to at least four readable bytes.
#[macro_export]
macro_rules! expect_uninitialized {
    ($ptr:expr) => {{
        let ptr = $ptr;
        // SAFETY: the caller guarantees four readable bytes.
        assert!(
            unsafe { $crate::memory::is_uninitialized(ptr) },
            "{} does not point to uninitialized memory",
            stringify!($ptr)
        );
    }};
}

/// Fails the test unless `ptr` was released while tracked.
#[macro_export]
macro_rules! expect_deleted {
    ($ptr:expr) => {
        assert!(
            $crate::memory::is_deleted($ptr),
            "{} was not deleted",
            stringify!($ptr)
        )
    };
}
