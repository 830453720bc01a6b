//! Call recording and expectations for hand-written mocks.
//!
//! A mock is a struct with one [`MockMethod`] per mocked operation. Each
//! recorder holds two kinds of rules:
//!
//! - **Defaults** ([`MockMethod::on_call`]) say what a call returns when
//!   nothing more specific applies. Installing one never constrains how often
//!   the method may be called.
//! - **Expectations** ([`MockMethod::expect_call`]) say how often matching
//!   calls must happen and may override the response. Newer expectations
//!   take precedence over older ones.
//!
//! Violations are collected and reported by [`MockMethod::verify`]; a
//! recorder that is dropped with unreported violations fails the test.
//!
//! # Example
//!
//! ```rust
//! use comkit::mock::matcher::{anything, eq};
//! use comkit::mock::{MockMethod, Times};
//!
//! let method: MockMethod<u32, u32> = MockMethod::new("Double");
//! method.on_call(anything()).will_by_default(|x: &mut u32| *x * 2);
//! method.expect_call(eq(4)).times(Times::once());
//!
//! assert_eq!(method.call(&mut 4), 8);
//! assert!(method.verify().is_ok());
//! ```

mod log_listener;
pub mod matcher;
mod prop_variant;
mod stream;
mod unknown;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use matcher::Matcher;

pub use log_listener::{
    with_message, DebugArgs, EventArgArgs, EventArgs, EventDescriptor, LogListener,
    LogListenerMode, LogSink, MessageMatcher, IMPLICIT_EVENT_ARGS,
};
pub use prop_variant::{
    set_prop_variant_to_bool, set_prop_variant_to_bstr, set_prop_variant_to_empty,
    set_prop_variant_to_stream, set_prop_variant_to_uint32, PropVariant, VT_BOOL, VT_BSTR,
    VT_EMPTY, VT_STREAM, VT_UI4,
};
pub use stream::{
    stat_with_name, CloneArgs, CopyToArgs, ReadArgs, RegionArgs, SeekArgs, SeekOrigin, StatArgs,
    StatInfo, StreamMock, WriteArgs, LOCK_EXCLUSIVE, LOCK_ONLYONCE, LOCK_WRITE, STATFLAG_DEFAULT,
    STATFLAG_NONAME, STGC_DEFAULT, STGC_OVERWRITE,
};
pub use unknown::{
    add_ref_action, iid_in, query_interface_action, query_interface_fail, release_action,
    set_com_object, setup_com_mock, with_iid, ComMock, IidMatcher, MockHandle,
    QueryInterfaceArgs, UnknownMock,
};

/// A response to a mocked call. It may modify the arguments to fill
/// output values.
pub type Action<A, R> = Rc<dyn Fn(&mut A) -> R>;

/// How many calls an expectation allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Between(usize, usize),
}

impl Times {
    /// Any number of calls, including none.
    pub const fn any() -> Self {
        Self::AtLeast(0)
    }

    pub const fn once() -> Self {
        Self::Exactly(1)
    }

    pub const fn never() -> Self {
        Self::Exactly(0)
    }

    fn bounds(self) -> (usize, Option<usize>) {
        match self {
            Self::Exactly(n) => (n, Some(n)),
            Self::AtLeast(n) => (n, None),
            Self::AtMost(n) => (0, Some(n)),
            Self::Between(lo, hi) => (lo, Some(hi)),
        }
    }

    /// Returns `true` if `calls` is within the allowed range.
    pub fn is_satisfied_by(self, calls: usize) -> bool {
        let (lo, hi) = self.bounds();
        calls >= lo && hi.map_or(true, |hi| calls <= hi)
    }

    /// Returns `true` if `calls` is above the upper bound.
    pub fn is_exceeded_by(self, calls: usize) -> bool {
        self.bounds().1.is_some_and(|hi| calls > hi)
    }
}

impl fmt::Display for Times {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exactly(0) => f.write_str("never"),
            Self::Exactly(1) => f.write_str("once"),
            Self::Exactly(n) => write!(f, "exactly {n} times"),
            Self::AtLeast(n) => write!(f, "at least {n} times"),
            Self::AtMost(n) => write!(f, "at most {n} times"),
            Self::Between(lo, hi) => write!(f, "between {lo} and {hi} times"),
        }
    }
}

/// What a recorder does with calls when it has no expectations at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Allow them silently.
    Nice,
    /// Allow them and log a warning.
    #[default]
    Naggy,
    /// Report them as failures.
    Strict,
}

struct DefaultRule<A, R> {
    matcher: Box<dyn Matcher<A>>,
    action: Action<A, R>,
}

struct Expectation<A, R> {
    matcher: Box<dyn Matcher<A>>,
    times: Option<Times>,
    actions: VecDeque<Action<A, R>>,
    once_count: usize,
    repeatedly: Option<Action<A, R>>,
    calls: usize,
}

impl<A, R> Expectation<A, R> {
    /// Explicit cardinality, or the one implied by the registered actions.
    fn cardinality(&self) -> Times {
        match (self.times, &self.repeatedly) {
            (Some(times), _) => times,
            (None, Some(_)) => Times::AtLeast(self.once_count),
            (None, None) => Times::Exactly(self.once_count.max(1)),
        }
    }
}

/// Records calls to one mocked operation and decides how to answer them.
pub struct MockMethod<A, R> {
    name: String,
    strictness: Cell<Strictness>,
    defaults: RefCell<Vec<DefaultRule<A, R>>>,
    expectations: RefCell<Vec<Expectation<A, R>>>,
    calls: RefCell<Vec<A>>,
    failures: RefCell<Vec<String>>,
}

impl<A, R> MockMethod<A, R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strictness: Cell::new(Strictness::default()),
            defaults: RefCell::new(Vec::new()),
            expectations: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
            failures: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_strictness(self, strictness: Strictness) -> Self {
        self.strictness.set(strictness);
        self
    }

    pub fn set_strictness(&self, strictness: Strictness) {
        self.strictness.set(strictness);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Violations recorded so far, without cardinality checks.
    pub fn failures(&self) -> Vec<String> {
        self.failures.borrow().clone()
    }

    /// Checks every expectation's call count and reports all violations.
    ///
    /// # Errors
    /// Returns [`Error::Verification`] listing each violation.
    pub fn verify(&self) -> Result<()> {
        let mut problems = self.failures.borrow().clone();
        for expectation in self.expectations.borrow().iter() {
            let times = expectation.cardinality();
            // Excess calls were already reported when they happened.
            if !times.is_satisfied_by(expectation.calls) && !times.is_exceeded_by(expectation.calls) {
                problems.push(format!(
                    "{}: expected call ({}) {}, actual: called {} times",
                    self.name,
                    expectation.matcher.describe(),
                    times,
                    expectation.calls
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Verification(problems))
        }
    }

    /// Verifies, then removes all expectations and recorded violations.
    /// Defaults stay installed.
    ///
    /// # Errors
    /// Returns the result of [`verify`](Self::verify) from before clearing.
    pub fn verify_and_clear(&self) -> Result<()> {
        let result = self.verify();
        self.expectations.borrow_mut().clear();
        self.failures.borrow_mut().clear();
        result
    }

    fn fail(&self, message: String) {
        debug!(method = %self.name, "{message}");
        self.failures.borrow_mut().push(message);
    }
}

impl<A: 'static, R: 'static> MockMethod<A, R> {
    /// Starts registering a default response for calls matching `matcher`.
    pub fn on_call(&self, matcher: impl Matcher<A> + 'static) -> OnCall<'_, A, R> {
        OnCall {
            method: self,
            matcher: Box::new(matcher),
        }
    }

    /// Registers an expectation for calls matching `matcher`.
    ///
    /// Without [`ExpectCall::times`], the cardinality follows the actions:
    /// once per `will_once`, at least that many with `will_repeatedly`, and
    /// exactly once when there are no actions.
    pub fn expect_call(&self, matcher: impl Matcher<A> + 'static) -> ExpectCall<'_, A, R> {
        let mut expectations = self.expectations.borrow_mut();
        expectations.push(Expectation {
            matcher: Box::new(matcher),
            times: None,
            actions: VecDeque::new(),
            once_count: 0,
            repeatedly: None,
            calls: 0,
        });
        ExpectCall {
            method: self,
            index: expectations.len() - 1,
        }
    }
}

impl<A: Clone + Debug + 'static, R: Default + 'static> MockMethod<A, R> {
    /// Dispatches a call. `args` may be modified by the chosen action.
    pub fn call(&self, args: &mut A) -> R {
        self.calls.borrow_mut().push(args.clone());
        // No borrow may be held here: actions are free to call back into mocks.
        match self.select_action(args) {
            Some(action) => action(args),
            None => R::default(),
        }
    }

    /// All recorded call arguments, oldest first.
    pub fn calls(&self) -> Vec<A> {
        self.calls.borrow().clone()
    }

    /// Returns `true` if some call had exactly these arguments.
    pub fn was_called_with(&self, expected: &A) -> bool
    where
        A: PartialEq,
    {
        self.calls.borrow().iter().any(|args| args == expected)
    }

    fn select_action(&self, args: &A) -> Option<Action<A, R>> {
        let mut expectations = self.expectations.borrow_mut();
        if expectations.is_empty() {
            drop(expectations);
            self.uninteresting(args);
            return self.default_action(args);
        }
        let Some(index) = expectations.iter().rposition(|e| e.matcher.matches(args)) else {
            drop(expectations);
            self.fail(format!("{}: unexpected call with {:?}", self.name, args));
            return self.default_action(args);
        };

        let expectation = &mut expectations[index];
        expectation.calls += 1;
        let times = expectation.cardinality();
        let calls = expectation.calls;
        let action = expectation
            .actions
            .pop_front()
            .or_else(|| expectation.repeatedly.clone());
        let excess = times
            .is_exceeded_by(calls)
            .then(|| expectation.matcher.describe());
        drop(expectations);

        if let Some(description) = excess {
            self.fail(format!(
                "{}({:?}) called more times than expected: expected ({}) {}, actual: called {} times",
                self.name, args, description, times, calls
            ));
        }
        action.or_else(|| self.default_action(args))
    }

    fn uninteresting(&self, args: &A) {
        match self.strictness.get() {
            Strictness::Nice => {}
            Strictness::Naggy => {
                warn!(method = %self.name, args = ?args, "uninteresting mock call");
            }
            Strictness::Strict => {
                self.fail(format!("{}: uninteresting call with {:?}", self.name, args));
            }
        }
    }

    fn default_action(&self, args: &A) -> Option<Action<A, R>> {
        self.defaults
            .borrow()
            .iter()
            .rev()
            .find(|rule| rule.matcher.matches(args))
            .map(|rule| Rc::clone(&rule.action))
    }
}

impl<A, R> Debug for MockMethod<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockMethod")
            .field("name", &self.name)
            .field("call_count", &self.call_count())
            .field("expectations", &self.expectations.borrow().len())
            .field("defaults", &self.defaults.borrow().len())
            .finish()
    }
}

impl<A, R> Drop for MockMethod<A, R> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Err(err) = self.verify() {
            panic!("{err}");
        }
    }
}

/// Builder returned by [`MockMethod::on_call`].
#[must_use = "call `will_by_default` to install the default"]
pub struct OnCall<'a, A, R> {
    method: &'a MockMethod<A, R>,
    matcher: Box<dyn Matcher<A>>,
}

impl<A, R> OnCall<'_, A, R> {
    pub fn will_by_default(self, action: impl Fn(&mut A) -> R + 'static) {
        self.method.defaults.borrow_mut().push(DefaultRule {
            matcher: self.matcher,
            action: Rc::new(action),
        });
    }
}

/// Builder returned by [`MockMethod::expect_call`]. The expectation is
/// already registered; the builder only refines it.
pub struct ExpectCall<'a, A, R> {
    method: &'a MockMethod<A, R>,
    index: usize,
}

impl<A, R> ExpectCall<'_, A, R> {
    fn update(&self, f: impl FnOnce(&mut Expectation<A, R>)) {
        if let Some(expectation) = self.method.expectations.borrow_mut().get_mut(self.index) {
            f(expectation);
        }
    }

    pub fn times(self, times: Times) -> Self {
        self.update(|e| e.times = Some(times));
        self
    }

    /// Answers the next matching call with `action`.
    pub fn will_once(self, action: impl Fn(&mut A) -> R + 'static) -> Self {
        self.update(|e| {
            e.actions.push_back(Rc::new(action));
            e.once_count += 1;
        });
        self
    }

    /// Answers every matching call after the `will_once` actions run out.
    pub fn will_repeatedly(self, action: impl Fn(&mut A) -> R + 'static) -> Self {
        self.update(|e| e.repeatedly = Some(Rc::new(action)));
        self
    }
}
