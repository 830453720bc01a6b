//! Provides test-support building blocks for code written against COM.
//!
//! comkit bundles three tools that unit tests of COM-style code keep
//! needing:
//!
//! - [`memory`] tracks releases of chosen heap blocks through a wrapping
//!   global allocator, so a test can prove an object was destroyed.
//! - [`malloc_spy`] is an allocation observer that records which addresses
//!   are live and which were freed. On Windows, [`win`] plugs it into the
//!   COM task allocator.
//! - [`mock`] has call recorders, argument matchers and ready-made COM
//!   mocks whose reference counts can be checked at the end of a test. It
//!   also records what code under test logs.
//!
//! The portable COM vocabulary they share lives in [`com`].
//!
//! # Examples
//! ```
//! use comkit::com::{Unknown, IID_ISTREAM, IID_IMALLOCSPY, E_NOINTERFACE};
//! use comkit::mock::{MockHandle, StreamMock};
//! use comkit::com_mock_verify;
//!
//! let stream = MockHandle::new("stream", StreamMock::new());
//! stream.setup(&[IID_ISTREAM]);
//!
//! let mut object = std::ptr::null_mut();
//! assert_eq!(stream.query_interface(&IID_IMALLOCSPY, Some(&mut object)), E_NOINTERFACE);
//! assert!(object.is_null());
//! com_mock_verify!(stream);
//! ```

// COM abstraction layer - must be declared first for macro availability
#[macro_use]
pub mod com;

pub mod error;
pub mod malloc_spy;
pub mod memory;
pub mod mock;
#[cfg(windows)]
pub mod win;

pub use error::{Error, Result};
