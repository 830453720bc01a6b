//! Connects a [`MallocSpy`] to the COM task allocator.
//!
//! The spy's bookkeeping is portable; this module only forwards the real
//! `IMallocSpy` callbacks to it and manages the process-wide registration.

use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, warn};
use windows::core::{Result, GUID, HRESULT};
use windows::Win32::System::Com::{CoRegisterMallocSpy, CoRevokeMallocSpy, IMallocSpy, IMallocSpy_Impl};
use windows_core::BOOL;

use crate::com::{Guid, HResult};
use crate::malloc_spy::{MallocSpy, MallocSpyHooks};

impl From<Guid> for GUID {
    fn from(value: Guid) -> Self {
        GUID::from_u128(value.to_u128())
    }
}

impl From<GUID> for Guid {
    fn from(value: GUID) -> Self {
        Guid::from_u128(value.to_u128())
    }
}

impl From<HResult> for HRESULT {
    fn from(value: HResult) -> Self {
        HRESULT(value.0)
    }
}

impl From<HRESULT> for HResult {
    fn from(value: HRESULT) -> Self {
        HResult(value.0)
    }
}

/// `IMallocSpy` implementation that delegates to a shared [`MallocSpy`].
#[windows::core::implement(IMallocSpy)]
pub struct MallocSpyAdapter {
    spy: Arc<MallocSpy>,
}

impl MallocSpyAdapter {
    pub fn new(spy: Arc<MallocSpy>) -> Self {
        Self { spy }
    }
}

impl IMallocSpy_Impl for MallocSpyAdapter_Impl {
    fn PreAlloc(&self, cbrequest: usize) -> usize {
        self.spy.pre_alloc(cbrequest)
    }

    fn PostAlloc(&self, pactual: *mut c_void) -> *mut c_void {
        self.spy.post_alloc(pactual)
    }

    fn PreFree(&self, prequest: *const c_void, fspyed: BOOL) -> *mut c_void {
        self.spy.pre_free(prequest as *mut c_void, fspyed.as_bool())
    }

    fn PostFree(&self, fspyed: BOOL) {
        self.spy.post_free(fspyed.as_bool());
    }

    fn PreRealloc(
        &self,
        prequest: *const c_void,
        cbrequest: usize,
        ppnewrequest: *mut *mut c_void,
        fspyed: BOOL,
    ) -> usize {
        // SAFETY: COM passes either null or a valid output location.
        let new_request = unsafe { ppnewrequest.as_mut() };
        self.spy.pre_realloc(
            prequest as *mut c_void,
            cbrequest,
            new_request,
            fspyed.as_bool(),
        )
    }

    fn PostRealloc(&self, pactual: *const c_void, fspyed: BOOL) -> *mut c_void {
        self.spy.post_realloc(pactual as *mut c_void, fspyed.as_bool())
    }

    fn PreGetSize(&self, prequest: *const c_void, fspyed: BOOL) -> *mut c_void {
        self.spy.pre_get_size(prequest as *mut c_void, fspyed.as_bool())
    }

    fn PostGetSize(&self, cbactual: usize, fspyed: BOOL) -> usize {
        self.spy.post_get_size(cbactual, fspyed.as_bool())
    }

    fn PreDidAlloc(&self, prequest: *const c_void, fspyed: BOOL) -> *mut c_void {
        self.spy.pre_did_alloc(prequest as *mut c_void, fspyed.as_bool())
    }

    fn PostDidAlloc(&self, prequest: *const c_void, fspyed: BOOL, factual: i32) -> i32 {
        self.spy
            .post_did_alloc(prequest as *mut c_void, fspyed.as_bool(), factual)
    }

    fn PreHeapMinimize(&self) {
        self.spy.pre_heap_minimize();
    }

    fn PostHeapMinimize(&self) {
        self.spy.post_heap_minimize();
    }
}

/// A registered spy. Dropping it revokes the registration.
///
/// Only one spy can be registered per process at a time.
pub struct SpyRegistration {
    spy: Arc<MallocSpy>,
}

impl SpyRegistration {
    /// Registers `spy` with `CoRegisterMallocSpy`.
    ///
    /// # Errors
    /// Fails with `CO_E_OBJISREG` if another spy is already registered.
    pub fn register(spy: Arc<MallocSpy>) -> Result<Self> {
        let adapter: IMallocSpy = MallocSpyAdapter::new(Arc::clone(&spy)).into();
        unsafe { CoRegisterMallocSpy(&adapter)? };
        debug!("malloc spy registered");
        Ok(Self { spy })
    }

    pub fn spy(&self) -> &Arc<MallocSpy> {
        &self.spy
    }
}

impl Drop for SpyRegistration {
    fn drop(&mut self) {
        // Revocation is deferred by COM while spied blocks are outstanding.
        match unsafe { CoRevokeMallocSpy() } {
            Ok(()) => debug!("malloc spy revoked"),
            Err(err) => warn!(error = %err, "failed to revoke malloc spy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use crate::com::{E_NOINTERFACE, IID_IMALLOCSPY};
    use windows::core::Interface;
    use windows::Win32::Foundation;
    use windows::Win32::System::Com::{CoTaskMemAlloc, CoTaskMemFree};

    #[test]
    fn test_conversions_match_windows_definitions() {
        assert_eq!(GUID::from(IID_IMALLOCSPY), IMallocSpy::IID);
        assert_eq!(Guid::from(IMallocSpy::IID), IID_IMALLOCSPY);
        assert_eq!(HRESULT::from(E_NOINTERFACE), Foundation::E_NOINTERFACE);
        assert_eq!(HResult::from(Foundation::E_NOINTERFACE), E_NOINTERFACE);
    }

    #[test]
    #[serial]
    fn test_task_allocator_is_observed() {
        let spy = Arc::new(MallocSpy::new());
        let registration = SpyRegistration::register(Arc::clone(&spy)).unwrap();

        let block = unsafe { CoTaskMemAlloc(4) };
        assert!(!block.is_null());
        assert!(registration.spy().is_allocated(block));

        unsafe { CoTaskMemFree(Some(block.cast_const())) };
        assert!(!spy.is_allocated(block));
        assert!(spy.is_deleted(block));

        drop(registration);
    }

    #[test]
    #[serial]
    fn test_second_registration_fails() {
        let first = SpyRegistration::register(Arc::new(MallocSpy::new())).unwrap();
        assert!(SpyRegistration::register(Arc::new(MallocSpy::new())).is_err());
        drop(first);
    }
}
