//! Provides assertion macros for pointers and COM mocks.
//!
//! # Examples
//! ```
//! use comkit::{assert_not_null, assert_null};
//!
//! let value = 5;
//! assert_null!(std::ptr::null::<i32>());
//! assert_not_null!(&value as *const i32);
//! ```

/// Fails the test if a raw pointer is not null.
#[macro_export]
macro_rules! assert_null {
    ($ptr:expr) => {{
        let ptr = $ptr;
        assert!(ptr.is_null(), "expected null, got {:p}", ptr);
    }};
}

/// Fails the test if a raw pointer is null.
#[macro_export]
macro_rules! assert_not_null {
    ($ptr:expr) => {{
        let ptr = $ptr;
        assert!(!ptr.is_null(), "expected a non-null pointer");
    }};
}

/// Same as [`assert_null!`]; kept for expectation-style tests.
#[macro_export]
macro_rules! expect_null {
    ($ptr:expr) => {
        $crate::assert_null!($ptr)
    };
}

/// Same as [`assert_not_null!`]; kept for expectation-style tests.
#[macro_export]
macro_rules! expect_not_null {
    ($ptr:expr) => {
        $crate::assert_not_null!($ptr)
    };
}

/// Verifies that a [`MockHandle`](crate::mock::MockHandle) is back at its
/// initial reference count of 1.
///
/// # Examples
/// ```
/// use comkit::com_mock_verify;
/// use comkit::com::Unknown;
/// use comkit::mock::{MockHandle, UnknownMock};
///
/// let handle = MockHandle::new("unknown", UnknownMock::new());
/// handle.setup(&[]);
/// handle.mock().add_ref();
/// handle.mock().release();
/// com_mock_verify!(handle);
/// ```
#[macro_export]
macro_rules! com_mock_verify {
    ($handle:expr) => {
        assert_eq!(
            1u32,
            $handle.ref_count(),
            "Reference count of {}",
            stringify!($handle)
        )
    };
}

/// Verifies that a [`MockHandle`](crate::mock::MockHandle) has a particular
/// reference count.
#[macro_export]
macro_rules! com_mock_expect_ref_count {
    ($count:expr, $handle:expr) => {
        assert_eq!(
            $count,
            $handle.ref_count(),
            "Reference count of {}",
            stringify!($handle)
        )
    };
}

// Re-export macros at crate root
pub use crate::assert_not_null;
pub use crate::assert_null;
pub use crate::com_mock_expect_ref_count;
pub use crate::com_mock_verify;
pub use crate::expect_not_null;
pub use crate::expect_null;
