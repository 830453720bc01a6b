//! Provides the portable COM vocabulary used across comkit.
//!
//! The types here model just enough of COM to test against: interface
//! identifiers ([`Guid`]), result codes ([`HResult`]), the identity
//! contract ([`Unknown`]) and a reusable reference count ([`RefCount`]).
//! They compile on every platform; the Windows bindings in `crate::win`
//! convert to and from the real `windows` types.
//!
//! # Overview
//!
//! - [`Unknown`] - `AddRef` / `Release` / `QueryInterface`
//! - [`RefCount`] - Atomic reference count starting at 1
//! - [`ComRc`] - Owning pointer that destroys its object on the final release
//! - [`invalid_ptr`] - Marker pointer for output slots that must be overwritten
//! - [`helpers::MutexExt`] - Panic-free mutex locking
//!
//! # Examples
//! ```
//! use comkit::com::{HResult, IID_IUNKNOWN, S_OK, E_NOINTERFACE};
//!
//! assert!(S_OK.is_ok());
//! assert!(E_NOINTERFACE.is_err());
//! assert_eq!(IID_IUNKNOWN.to_string(), "{00000000-0000-0000-C000-000000000046}");
//! ```

pub mod helpers;

#[macro_use]
pub mod macros;

use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use crate::error::{Error, Result};

// Re-export commonly used items
pub use helpers::{catch_hook, MutexExt};

// ---------------------------------------------------------------------------
// Interface identifiers
// ---------------------------------------------------------------------------

/// A COM interface identifier, laid out like the Windows `GUID`.
///
/// # Examples
/// ```
/// use comkit::com::Guid;
///
/// let iid = Guid::from_u128(0x0000001d_0000_0000_c000_000000000046);
/// assert_eq!(iid.data1, 0x1d);
/// assert_eq!(iid.data4, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]);
/// ```
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Builds a GUID from its big-endian 128-bit form.
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: (value >> 80) as u16,
            data3: (value >> 64) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }

    /// Returns the big-endian 128-bit form.
    pub const fn to_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// `IUnknown`
pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);
/// `IMallocSpy`
pub const IID_IMALLOCSPY: Guid = Guid::from_u128(0x0000001d_0000_0000_c000_000000000046);
/// `ISequentialStream`
pub const IID_ISEQUENTIALSTREAM: Guid = Guid::from_u128(0x0c733a30_2a1c_11ce_ade5_00aa0044773d);
/// `IStream`
pub const IID_ISTREAM: Guid = Guid::from_u128(0x0000000c_0000_0000_c000_000000000046);

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

/// A COM result code. Negative values are failures.
///
/// # Examples
/// ```
/// use comkit::com::{E_INVALIDARG, S_FALSE};
///
/// assert!(S_FALSE.is_ok());
/// assert!(E_INVALIDARG.ok().is_err());
/// assert_eq!(E_INVALIDARG.to_string(), "0x80070057");
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

impl HResult {
    /// Returns `true` for success codes.
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// Returns `true` for failure codes.
    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// Converts a failure code into [`Error::Com`].
    ///
    /// # Errors
    /// Returns `Error::Com(self)` if this is a failure code.
    pub fn ok(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Com(self))
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            S_OK => "S_OK",
            S_FALSE => "S_FALSE",
            E_NOTIMPL => "E_NOTIMPL",
            E_NOINTERFACE => "E_NOINTERFACE",
            E_POINTER => "E_POINTER",
            E_FAIL => "E_FAIL",
            E_OUTOFMEMORY => "E_OUTOFMEMORY",
            E_INVALIDARG => "E_INVALIDARG",
            _ => return write!(f, "HResult({self})"),
        };
        f.write_str(name)
    }
}

pub const S_OK: HResult = HResult(0);
pub const S_FALSE: HResult = HResult(1);
pub const E_NOTIMPL: HResult = HResult(0x80004001u32 as i32);
pub const E_NOINTERFACE: HResult = HResult(0x80004002u32 as i32);
pub const E_POINTER: HResult = HResult(0x80004003u32 as i32);
pub const E_FAIL: HResult = HResult(0x80004005u32 as i32);
pub const E_OUTOFMEMORY: HResult = HResult(0x8007000Eu32 as i32);
pub const E_INVALIDARG: HResult = HResult(0x80070057u32 as i32);

static INVALID_TARGET: u8 = 0;

/// A non-null pointer that never refers to a `T`.
///
/// Put it in output slots to check that the code under test overwrites them,
/// or pass it where a pointer must be non-null but is never dereferenced.
/// Every `T` gets the same address.
///
/// # Examples
/// ```
/// use comkit::com::invalid_ptr;
///
/// let slot: *mut u64 = invalid_ptr();
/// assert!(!slot.is_null());
/// assert_eq!(slot.cast::<u8>(), invalid_ptr::<u8>());
/// ```
pub fn invalid_ptr<T>() -> *mut T {
    std::ptr::addr_of!(INVALID_TARGET).cast_mut().cast()
}

// ---------------------------------------------------------------------------
// Identity contract
// ---------------------------------------------------------------------------

/// The COM identity contract every object exposes.
///
/// By default `release` only decrements and destroying a heap object on the
/// final release is the job of its owner ([`ComRc`] or [`release_raw`]), so
/// the same type can live on the stack in a test. A type that must survive
/// being released through a bare `&dyn Unknown` overrides [`adopt_heap`] and
/// [`destroys_itself`] and frees itself instead.
///
/// [`adopt_heap`]: Unknown::adopt_heap
/// [`destroys_itself`]: Unknown::destroys_itself
pub trait Unknown {
    /// Increments the reference count and returns the new count.
    fn add_ref(&self) -> u32;

    /// Decrements the reference count and returns the new count.
    fn release(&self) -> u32;

    /// Asks for another interface of this object.
    ///
    /// `object` is the output location; `None` models a null pointer and must
    /// fail with [`E_INVALIDARG`]. On success the object is stored and its
    /// reference count incremented; on failure null is stored.
    fn query_interface(&self, iid: &Guid, object: Option<&mut *mut c_void>) -> HResult;

    /// Called by [`ComRc::new`] once the object sits in its own leaked
    /// `Box`. Objects that free themselves remember this and do so when
    /// `release` reaches zero.
    ///
    /// # Safety
    ///
    /// `self` must be the sole content of a `Box` allocation that is owned
    /// by the object's references from now on.
    unsafe fn adopt_heap(&self) {}

    /// Returns `true` if the final `release` frees the object, in which case
    /// owners must not free it again.
    fn destroys_itself(&self) -> bool {
        false
    }
}

/// Thread-safe COM reference count, initialized to 1.
///
/// # Examples
/// ```
/// use comkit::com::RefCount;
///
/// let count = RefCount::new();
/// assert_eq!(count.add_ref(), 2);
/// assert_eq!(count.release(), 1);
/// assert_eq!(count.get(), 1);
/// ```
#[derive(Debug)]
pub struct RefCount(AtomicU32);

impl RefCount {
    pub const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub fn add_ref(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn release(&self) -> u32 {
        let previous = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "release on a dead object");
        let count = previous.wrapping_sub(1);
        if count == 0 {
            // Synchronize with every earlier release before the owner frees.
            fence(Ordering::Acquire);
        }
        count
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a heap object created by [`ComRc::into_raw`], destroying it when
/// the count reaches zero.
///
/// # Safety
///
/// `ptr` must come from [`ComRc::into_raw`] and the caller must own one of
/// its references. The pointer must not be used after the call if it
/// returned 0.
pub unsafe fn release_raw<T: Unknown>(ptr: *mut T) -> u32 {
    let destroys_itself = (*ptr).destroys_itself();
    let count = (*ptr).release();
    if count == 0 && !destroys_itself {
        drop(Box::from_raw(ptr));
    }
    count
}

/// An owning pointer to a heap-allocated COM object.
///
/// Cloning calls `add_ref`; dropping calls `release` and frees the object
/// once the count reaches zero.
///
/// # Examples
/// ```
/// use comkit::com::{ComRc, Unknown};
/// use comkit::malloc_spy::MallocSpy;
///
/// let spy = ComRc::new(MallocSpy::new());
/// let second = spy.clone();
/// assert_eq!(spy.add_ref(), 3);
/// assert_eq!(spy.release(), 2);
/// drop(second);
/// drop(spy);
/// ```
pub struct ComRc<T: Unknown> {
    ptr: NonNull<T>,
}

impl<T: Unknown> ComRc<T> {
    /// Moves `value` to the heap. The value's initial reference becomes the
    /// one owned by the returned pointer.
    pub fn new(value: T) -> Self {
        let object: &T = Box::leak(Box::new(value));
        // SAFETY: object is the only content of the leaked box and its single
        // reference moves into the returned pointer.
        unsafe { object.adopt_heap() };
        Self {
            ptr: NonNull::from(object),
        }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Hands the owned reference to the caller without releasing it.
    pub fn into_raw(this: Self) -> *mut T {
        let ptr = this.ptr.as_ptr();
        std::mem::forget(this);
        ptr
    }

    /// Takes ownership of one reference of a raw object.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`ComRc::into_raw`] and carry a reference the
    /// caller is giving up.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
        }
    }
}

impl<T: Unknown> Deref for ComRc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the pointer holds a reference, so the object is alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Unknown> Clone for ComRc<T> {
    fn clone(&self) -> Self {
        self.add_ref();
        Self { ptr: self.ptr }
    }
}

impl<T: Unknown> Drop for ComRc<T> {
    fn drop(&mut self) {
        // SAFETY: this pointer owns exactly one reference.
        unsafe {
            release_raw(self.ptr.as_ptr());
        }
    }
}

impl<T: Unknown + fmt::Debug> fmt::Debug for ComRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComRc").field(&**self).finish()
    }
}

// SAFETY: ComRc only hands out shared references and counts atomically
// through T, so it is as thread-safe as T itself.
unsafe impl<T: Unknown + Send + Sync> Send for ComRc<T> {}
unsafe impl<T: Unknown + Send + Sync> Sync for ComRc<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Counted {
        refs: RefCount,
        drops: Arc<AtomicUsize>,
    }

    impl Unknown for Counted {
        fn add_ref(&self) -> u32 {
            self.refs.add_ref()
        }

        fn release(&self) -> u32 {
            self.refs.release()
        }

        fn query_interface(&self, iid: &Guid, object: Option<&mut *mut c_void>) -> HResult {
            let Some(object) = object else {
                return E_INVALIDARG;
            };
            if *iid == IID_IUNKNOWN {
                *object = self as *const Self as *mut c_void;
                self.add_ref();
                S_OK
            } else {
                *object = std::ptr::null_mut();
                E_NOINTERFACE
            }
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted() -> (Counted, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Counted {
                refs: RefCount::new(),
                drops: Arc::clone(&drops),
            },
            drops,
        )
    }

    #[test]
    fn test_guid_round_trips_u128() {
        let value = 0x0c733a30_2a1c_11ce_ade5_00aa0044773d;
        assert_eq!(Guid::from_u128(value).to_u128(), value);
        assert_eq!(
            IID_ISEQUENTIALSTREAM.to_string(),
            "{0C733A30-2A1C-11CE-ADE5-00AA0044773D}"
        );
    }

    #[test]
    fn test_hresult_classification() {
        assert!(S_OK.is_ok());
        assert!(S_FALSE.is_ok());
        for code in [E_NOTIMPL, E_NOINTERFACE, E_POINTER, E_FAIL, E_OUTOFMEMORY, E_INVALIDARG] {
            assert!(code.is_err(), "{code:?} should be a failure");
        }
        assert_eq!(E_FAIL.ok(), Err(Error::Com(E_FAIL)));
        assert_eq!(format!("{:?}", E_NOINTERFACE), "E_NOINTERFACE");
        assert_eq!(format!("{:?}", HResult(0x8000_FFFFu32 as i32)), "HResult(0x8000FFFF)");
    }

    #[test]
    fn test_invalid_ptr_is_stable_and_non_null() {
        let first: *mut c_void = invalid_ptr();
        assert!(!first.is_null());
        assert_eq!(first, invalid_ptr::<c_void>());
        assert_eq!(first.cast::<Guid>(), invalid_ptr::<Guid>());
    }

    #[test]
    fn test_query_interface_overwrites_invalid_slot() {
        let (value, _drops) = counted();
        let mut object = invalid_ptr();
        assert_eq!(value.query_interface(&IID_IMALLOCSPY, Some(&mut object)), E_NOINTERFACE);
        assert!(object.is_null());
    }

    #[test]
    fn test_ref_count_starts_at_one() {
        let count = RefCount::new();
        assert_eq!(count.get(), 1);
        assert_eq!(count.add_ref(), 2);
        assert_eq!(count.add_ref(), 3);
        assert_eq!(count.release(), 2);
        assert_eq!(count.release(), 1);
        assert_eq!(count.release(), 0);
    }

    #[test]
    fn test_com_rc_destroys_on_last_release() {
        let (value, drops) = counted();
        let first = ComRc::new(value);
        let second = first.clone();
        assert_eq!(first.refs.get(), 2);

        drop(first);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_raw_after_query_interface() {
        let (value, drops) = counted();
        let raw = ComRc::into_raw(ComRc::new(value));

        let mut object = std::ptr::null_mut();
        // SAFETY: raw is alive and owned by this test.
        let hr = unsafe { (*raw).query_interface(&IID_IUNKNOWN, Some(&mut object)) };
        assert_eq!(hr, S_OK);
        assert_eq!(object, raw.cast::<c_void>());

        unsafe {
            assert_eq!(release_raw(raw), 1);
            assert_eq!(drops.load(Ordering::SeqCst), 0);
            assert_eq!(release_raw(raw), 0);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    /// Frees itself once it has been adopted by a `ComRc`.
    struct SelfFreeing {
        inner: Counted,
        heap: std::sync::atomic::AtomicBool,
    }

    impl Unknown for SelfFreeing {
        fn add_ref(&self) -> u32 {
            self.inner.add_ref()
        }

        fn release(&self) -> u32 {
            let count = self.inner.release();
            if count == 0 && self.heap.load(Ordering::Acquire) {
                unsafe { drop(Box::from_raw(self as *const Self as *mut Self)) };
            }
            count
        }

        fn query_interface(&self, iid: &Guid, object: Option<&mut *mut c_void>) -> HResult {
            self.inner.query_interface(iid, object)
        }

        unsafe fn adopt_heap(&self) {
            self.heap.store(true, Ordering::Release);
        }

        fn destroys_itself(&self) -> bool {
            self.heap.load(Ordering::Acquire)
        }
    }

    #[test]
    fn test_self_freeing_object_is_freed_once() {
        let (inner, drops) = counted();
        let object = ComRc::new(SelfFreeing {
            inner,
            heap: std::sync::atomic::AtomicBool::new(false),
        });
        assert!(object.destroys_itself());
        let second = object.clone();

        drop(object);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_freeing_object_released_through_dyn() {
        let (inner, drops) = counted();
        let raw = ComRc::into_raw(ComRc::new(SelfFreeing {
            inner,
            heap: std::sync::atomic::AtomicBool::new(false),
        }));
        // SAFETY: raw is alive and holds one reference owned by this test.
        let object: &dyn Unknown = unsafe { &*raw };
        assert_eq!(object.add_ref(), 2);
        assert_eq!(object.release(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(object.release(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stack_object_is_not_destroyed_by_release() {
        let (value, drops) = counted();
        assert_eq!(value.release(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(value);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
