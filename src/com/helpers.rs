//! Provides panic-free helpers for code that runs inside allocator hooks.
//!
//! Allocation callbacks are often invoked from destructors or during unwind,
//! where a panic would abort the process. The helpers here turn lock
//! poisoning into an error and contain panics raised by bookkeeping.
//!
//! # Examples
//! ```
//! use comkit::com::helpers::catch_hook;
//!
//! // A panicking hook body is contained; the caller just sees `None`.
//! let outcome = catch_hook(|| -> usize { panic!("bookkeeping failed") });
//! assert!(outcome.is_none());
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Locks a std `Mutex` from inside an allocator hook.
///
/// The release tracker keeps its address sets behind a std `Mutex` because
/// it must be usable from a `static` global allocator. A hook that finds the
/// lock poisoned skips its bookkeeping instead of panicking mid-allocation.
///
/// # Examples
/// ```
/// use std::collections::BTreeSet;
/// use std::sync::Mutex;
///
/// use comkit::com::helpers::MutexExt;
///
/// let watched: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());
/// if let Ok(mut set) = watched.lock_or_fail() {
///     set.insert(0x1000);
/// }
/// assert!(watched.lock_or_fail().is_ok_and(|set| set.contains(&0x1000)));
/// ```
pub trait MutexExt<T> {
    /// Locks the mutex, returning [`Error::LockPoisoned`] instead of panicking.
    fn lock_or_fail(&self) -> Result<MutexGuard<'_, T>>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_or_fail(&self) -> Result<MutexGuard<'_, T>> {
        self.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// Runs bookkeeping inside a hook, discarding any panic it raises.
///
/// Returns `None` if `body` panicked. The real allocator operation around
/// the hook must go ahead either way.
///
/// # Examples
/// ```
/// use comkit::com::helpers::catch_hook;
///
/// assert_eq!(catch_hook(|| 7), Some(7));
/// ```
pub fn catch_hook<R>(body: impl FnOnce() -> R) -> Option<R> {
    // AssertUnwindSafe: the state touched by hooks is either behind a lock
    // that does not poison or is discarded on failure.
    catch_unwind(AssertUnwindSafe(body)).ok()
}
