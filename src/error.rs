//! Error definitions for comkit.
//!
//! Hooks that run inside an allocator never return these errors; they are
//! reserved for the explicit, caller-facing APIs.

use thiserror::Error;

use crate::com::HResult;

/// Main error type for comkit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying allocator could not satisfy a tracked allocation.
    #[error("out of memory allocating {size} bytes (align {align})")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A COM call returned a failure code.
    #[error("COM call failed: {0}")]
    Com(HResult),

    /// A lock guarding shared bookkeeping was poisoned by a panicking thread.
    #[error("lock poisoned")]
    LockPoisoned,

    /// One or more mock expectations were violated or left unsatisfied.
    #[error("mock verification failed:\n{}", .0.join("\n"))]
    Verification(Vec<String>),

    /// A helper assertion failed outside of a panicking context.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
}

impl Error {
    /// Create an out-of-memory error for the given layout.
    #[must_use]
    pub fn out_of_memory(layout: std::alloc::Layout) -> Self {
        Self::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        }
    }

    /// Create an assertion error.
    #[must_use]
    pub fn assertion_failed(message: impl Into<String>) -> Self {
        Self::AssertionFailed(message.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::E_NOINTERFACE;

    #[test]
    fn test_out_of_memory_message() {
        let layout = std::alloc::Layout::from_size_align(64, 8).unwrap();
        let err = Error::out_of_memory(layout);
        assert_eq!(err, Error::OutOfMemory { size: 64, align: 8 });
        assert_eq!(err.to_string(), "out of memory allocating 64 bytes (align 8)");
    }

    #[test]
    fn test_verification_lists_every_failure() {
        let err = Error::Verification(vec!["first".into(), "second".into()]);
        let text = err.to_string();
        assert!(text.contains("first"));
        assert!(text.contains("second"));
    }

    #[test]
    fn test_com_error_shows_code() {
        let err = Error::Com(E_NOINTERFACE);
        assert!(err.to_string().contains("0x80004002"));
    }
}
