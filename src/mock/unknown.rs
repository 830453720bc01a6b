//! Identity-contract mocks and their reference-counting defaults.

use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::ops::Deref;
use std::ptr;
use std::rc::Rc;

use tracing::debug;

use super::matcher::{any_of, anything, eq, AnyOfMatcher, EqMatcher, Matcher};
use super::{MockMethod, Strictness, Times};
use crate::com::{Guid, HResult, Unknown, E_INVALIDARG, E_NOINTERFACE, IID_IUNKNOWN, S_OK};

/// Arguments of a mocked `query_interface` call.
///
/// `object` starts out null; an action fills it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryInterfaceArgs {
    pub iid: Guid,
    pub object: *mut c_void,
}

impl QueryInterfaceArgs {
    pub fn new(iid: Guid) -> Self {
        Self {
            iid,
            object: ptr::null_mut(),
        }
    }
}

/// A mock that answers the identity contract through recorders.
///
/// Implementing this trait gives the type an [`Unknown`] implementation
/// that forwards to the three recorders.
pub trait ComMock: 'static {
    fn add_ref_method(&self) -> &MockMethod<(), u32>;
    fn release_method(&self) -> &MockMethod<(), u32>;
    fn query_interface_method(&self) -> &MockMethod<QueryInterfaceArgs, HResult>;
}

impl<M: ComMock> Unknown for M {
    fn add_ref(&self) -> u32 {
        self.add_ref_method().call(&mut ())
    }

    fn release(&self) -> u32 {
        self.release_method().call(&mut ())
    }

    fn query_interface(&self, iid: &Guid, object: Option<&mut *mut c_void>) -> HResult {
        let Some(object) = object else {
            return E_INVALIDARG;
        };
        let mut args = QueryInterfaceArgs::new(*iid);
        let hr = self.query_interface_method().call(&mut args);
        *object = args.object;
        hr
    }
}

/// The smallest COM mock: nothing but the identity contract.
pub struct UnknownMock {
    add_ref: MockMethod<(), u32>,
    release: MockMethod<(), u32>,
    query_interface: MockMethod<QueryInterfaceArgs, HResult>,
}

impl UnknownMock {
    pub fn new() -> Self {
        Self {
            add_ref: MockMethod::new("AddRef"),
            release: MockMethod::new("Release"),
            query_interface: MockMethod::new("QueryInterface"),
        }
    }

    pub fn set_strictness(&self, strictness: Strictness) {
        self.add_ref.set_strictness(strictness);
        self.release.set_strictness(strictness);
        self.query_interface.set_strictness(strictness);
    }
}

impl Default for UnknownMock {
    fn default() -> Self {
        Self::new()
    }
}

impl ComMock for UnknownMock {
    fn add_ref_method(&self) -> &MockMethod<(), u32> {
        &self.add_ref
    }

    fn release_method(&self) -> &MockMethod<(), u32> {
        &self.release
    }

    fn query_interface_method(&self) -> &MockMethod<QueryInterfaceArgs, HResult> {
        &self.query_interface
    }
}

impl fmt::Debug for UnknownMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnknownMock")
            .field("add_ref", &self.add_ref)
            .field("release", &self.release)
            .field("query_interface", &self.query_interface)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Increments `count` and returns the new value.
pub fn add_ref_action(count: &Rc<Cell<u32>>) -> impl Fn(&mut ()) -> u32 + 'static {
    let count = Rc::clone(count);
    move |_| {
        let value = count.get().wrapping_add(1);
        count.set(value);
        value
    }
}

/// Decrements `count` and returns the new value.
pub fn release_action(count: &Rc<Cell<u32>>) -> impl Fn(&mut ()) -> u32 + 'static {
    let count = Rc::clone(count);
    move |_| {
        let value = count.get().wrapping_sub(1);
        count.set(value);
        value
    }
}

/// Hands out `mock` itself and adds a reference through its own `add_ref`.
///
/// The action holds a weak reference; once the mock is gone it stores null
/// and returns `E_NOINTERFACE`.
pub fn query_interface_action<M: ComMock>(
    mock: &Rc<M>,
) -> impl Fn(&mut QueryInterfaceArgs) -> HResult + 'static {
    let set = set_com_object(mock);
    move |args| {
        if set(&mut args.object) {
            S_OK
        } else {
            E_NOINTERFACE
        }
    }
}

/// Stores null and returns `E_NOINTERFACE`.
pub fn query_interface_fail() -> impl Fn(&mut QueryInterfaceArgs) -> HResult + 'static {
    |args| {
        args.object = ptr::null_mut();
        E_NOINTERFACE
    }
}

/// Returns a setter that writes `object` into an output slot and adds a
/// reference to it. The setter returns `false` and writes null once the
/// object has been dropped.
///
/// Use it inside actions for methods that hand out other COM objects.
pub fn set_com_object<M: ComMock>(object: &Rc<M>) -> impl Fn(&mut *mut c_void) -> bool + 'static {
    let weak = Rc::downgrade(object);
    move |slot| match weak.upgrade() {
        Some(object) => {
            *slot = Rc::as_ptr(&object) as *mut c_void;
            object.add_ref();
            true
        }
        None => {
            *slot = ptr::null_mut();
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

/// Matches any of `iids`.
pub fn iid_in(iids: impl IntoIterator<Item = Guid>) -> AnyOfMatcher<Guid> {
    let matchers: Vec<EqMatcher<Guid>> = iids.into_iter().map(eq).collect();
    any_of(matchers)
}

/// Matches `query_interface` calls whose requested IID satisfies `matcher`.
pub fn with_iid(matcher: impl Matcher<Guid> + 'static) -> IidMatcher {
    IidMatcher {
        inner: Box::new(matcher),
    }
}

/// Matcher returned by [`with_iid`].
pub struct IidMatcher {
    inner: Box<dyn Matcher<Guid>>,
}

impl Matcher<QueryInterfaceArgs> for IidMatcher {
    fn matches(&self, value: &QueryInterfaceArgs) -> bool {
        self.inner.matches(&value.iid)
    }

    fn describe(&self) -> String {
        format!("iid {}", self.inner.describe())
    }

    fn describe_mismatch(&self, value: &QueryInterfaceArgs) -> String {
        self.inner.describe_mismatch(&value.iid)
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Installs reference counting and interface lookup on a COM mock.
///
/// - `add_ref` and `release` move `ref_count` up and down.
/// - `query_interface` hands out the mock for `IID_IUNKNOWN` and every IID
///   in `interfaces`, and fails with `E_NOINTERFACE` for anything else.
///
/// Each of these calls is also expected any number of times, so a test can
/// layer its own stricter expectations on top and still have every other
/// call answered by the defaults.
pub fn setup_com_mock<M: ComMock>(mock: &Rc<M>, ref_count: &Rc<Cell<u32>>, interfaces: &[Guid]) {
    let supported: Vec<Guid> = std::iter::once(IID_IUNKNOWN)
        .chain(interfaces.iter().copied())
        .collect();

    mock.add_ref_method()
        .on_call(anything())
        .will_by_default(add_ref_action(ref_count));
    mock.release_method()
        .on_call(anything())
        .will_by_default(release_action(ref_count));
    mock.query_interface_method()
        .on_call(anything())
        .will_by_default(query_interface_fail());
    mock.query_interface_method()
        .on_call(with_iid(iid_in(supported.clone())))
        .will_by_default(query_interface_action(mock));

    mock.add_ref_method().expect_call(anything()).times(Times::any());
    mock.release_method().expect_call(anything()).times(Times::any());
    mock.query_interface_method()
        .expect_call(anything())
        .times(Times::any());
    mock.query_interface_method()
        .expect_call(with_iid(iid_in(supported)))
        .times(Times::any());

    debug!(interfaces = interfaces.len(), "COM mock set up");
}

/// Owns a COM mock together with the reference count its defaults maintain.
///
/// The count starts at 1, the reference held by the test itself.
///
/// # Examples
/// ```
/// use comkit::com::{Unknown, IID_ISTREAM};
/// use comkit::mock::{MockHandle, StreamMock};
///
/// let stream = MockHandle::new("stream", StreamMock::new());
/// stream.setup(&[IID_ISTREAM]);
///
/// let mut object = std::ptr::null_mut();
/// assert!(stream.query_interface(&IID_ISTREAM, Some(&mut object)).is_ok());
/// assert_eq!(stream.ref_count(), 2);
/// stream.release();
/// stream.verify();
/// ```
pub struct MockHandle<M: ComMock> {
    name: String,
    mock: Rc<M>,
    ref_count: Rc<Cell<u32>>,
}

impl<M: ComMock> MockHandle<M> {
    pub fn new(name: impl Into<String>, mock: M) -> Self {
        Self {
            name: name.into(),
            mock: Rc::new(mock),
            ref_count: Rc::new(Cell::new(1)),
        }
    }

    /// See [`setup_com_mock`].
    pub fn setup(&self, interfaces: &[Guid]) {
        debug!(mock = %self.name, "setting up");
        setup_com_mock(&self.mock, &self.ref_count, interfaces);
    }

    pub fn mock(&self) -> &Rc<M> {
        &self.mock
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    /// The shared cell behind [`ref_count`](Self::ref_count).
    pub fn ref_count_cell(&self) -> &Rc<Cell<u32>> {
        &self.ref_count
    }

    /// The address `query_interface` hands out for this mock.
    pub fn as_raw(&self) -> *mut c_void {
        Rc::as_ptr(&self.mock) as *mut c_void
    }

    /// Asserts that the count is back at 1.
    ///
    /// # Panics
    /// Panics if any reference taken during the test was not released.
    pub fn verify(&self) {
        self.expect_ref_count(1);
    }

    /// # Panics
    /// Panics if the count differs from `expected`.
    pub fn expect_ref_count(&self, expected: u32) {
        assert_eq!(
            expected,
            self.ref_count(),
            "Reference count of {}",
            self.name
        );
    }
}

impl<M: ComMock> Deref for MockHandle<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.mock
    }
}

impl<M: ComMock> fmt::Debug for MockHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHandle")
            .field("name", &self.name)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}
