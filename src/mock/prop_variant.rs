//! Property values handed out by mocked property getters.
//!
//! [`PropVariant`] covers the value kinds tests hand back in practice. The
//! `set_prop_variant_to_*` functions return setters for use inside actions,
//! in the same shape as [`set_com_object`](super::set_com_object).
//!
//! # Examples
//! ```
//! use comkit::mock::matcher::anything;
//! use comkit::mock::{set_prop_variant_to_uint32, MockMethod, PropVariant};
//! use comkit::com::{HResult, S_OK};
//!
//! let get_value: MockMethod<PropVariant, HResult> = MockMethod::new("GetValue");
//! let set = set_prop_variant_to_uint32(7);
//! get_value.expect_call(anything()).will_once(move |pv| {
//!     set(pv);
//!     S_OK
//! });
//!
//! let mut value = PropVariant::default();
//! assert_eq!(get_value.call(&mut value), S_OK);
//! assert_eq!(value, PropVariant::UInt32(7));
//! ```

use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

use super::unknown::ComMock;

pub const VT_EMPTY: u16 = 0;
pub const VT_BSTR: u16 = 8;
pub const VT_BOOL: u16 = 11;
pub const VT_UI4: u16 = 19;
pub const VT_STREAM: u16 = 66;

/// A tagged property value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PropVariant {
    #[default]
    Empty,
    Bool(bool),
    Bstr(String),
    UInt32(u32),
    /// A stream that carries one reference owned by the value's receiver.
    Stream(*mut c_void),
}

impl PropVariant {
    /// The `VT_*` tag of the value.
    pub fn vartype(&self) -> u16 {
        match self {
            Self::Empty => VT_EMPTY,
            Self::Bool(_) => VT_BOOL,
            Self::Bstr(_) => VT_BSTR,
            Self::UInt32(_) => VT_UI4,
            Self::Stream(_) => VT_STREAM,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

pub fn set_prop_variant_to_bool(value: bool) -> impl Fn(&mut PropVariant) + 'static {
    move |pv| *pv = PropVariant::Bool(value)
}

pub fn set_prop_variant_to_bstr(value: &str) -> impl Fn(&mut PropVariant) + 'static {
    let value = value.to_owned();
    move |pv| *pv = PropVariant::Bstr(value.clone())
}

pub fn set_prop_variant_to_empty() -> impl Fn(&mut PropVariant) + 'static {
    |pv| *pv = PropVariant::Empty
}

pub fn set_prop_variant_to_uint32(value: u32) -> impl Fn(&mut PropVariant) + 'static {
    move |pv| *pv = PropVariant::UInt32(value)
}

/// Stores `stream` and adds a reference to it for the receiver.
///
/// Like [`set_com_object`](super::set_com_object) the setter holds the
/// stream weakly; once it is gone the value becomes [`PropVariant::Empty`]
/// and the setter returns `false`.
pub fn set_prop_variant_to_stream<M: ComMock>(
    stream: &Rc<M>,
) -> impl Fn(&mut PropVariant) -> bool + 'static {
    let set = super::set_com_object(stream);
    move |pv| {
        let mut object = ptr::null_mut();
        if set(&mut object) {
            *pv = PropVariant::Stream(object);
            true
        } else {
            *pv = PropVariant::Empty;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{Unknown, IID_ISTREAM};
    use crate::mock::{MockHandle, StreamMock};

    #[test]
    fn test_scalar_setters_replace_value() {
        let mut pv = PropVariant::Bstr("old".to_string());
        set_prop_variant_to_bool(true)(&mut pv);
        assert_eq!(pv, PropVariant::Bool(true));
        assert_eq!(pv.vartype(), VT_BOOL);

        set_prop_variant_to_uint32(u32::MAX)(&mut pv);
        assert_eq!(pv, PropVariant::UInt32(u32::MAX));
        assert_eq!(pv.vartype(), VT_UI4);

        set_prop_variant_to_empty()(&mut pv);
        assert!(pv.is_empty());
        assert_eq!(pv.vartype(), VT_EMPTY);
    }

    #[test]
    fn test_bstr_setter_is_reusable() {
        let set = set_prop_variant_to_bstr("Text/Plain");
        let mut first = PropVariant::default();
        let mut second = PropVariant::UInt32(1);
        set(&mut first);
        set(&mut second);
        assert_eq!(first, PropVariant::Bstr("Text/Plain".to_string()));
        assert_eq!(first, second);
        assert_eq!(first.vartype(), VT_BSTR);
    }

    #[test]
    fn test_stream_setter_adds_reference() {
        let stream = MockHandle::new("stream", StreamMock::new());
        stream.setup(&[IID_ISTREAM]);
        let set = set_prop_variant_to_stream(stream.mock());

        let mut pv = PropVariant::default();
        assert!(set(&mut pv));
        assert_eq!(pv, PropVariant::Stream(stream.as_raw()));
        assert_eq!(pv.vartype(), VT_STREAM);
        stream.expect_ref_count(2);

        stream.release();
        stream.verify();
    }

    #[test]
    fn test_stream_setter_after_stream_is_gone() {
        let set = {
            let stream = MockHandle::new("stream", StreamMock::new());
            set_prop_variant_to_stream(stream.mock())
        };
        let mut pv = PropVariant::Bool(false);
        assert!(!set(&mut pv));
        assert!(pv.is_empty());
    }
}
