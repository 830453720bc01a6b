#![allow(clippy::must_use_candidate)]

//! Matchers for call arguments and assertions.
//!
//! - [`Matcher`] trait for custom matchers
//! - Built-in matchers: [`eq`], [`ne`], [`anything`], [`bits_set`], [`matches_regex`]
//! - Combinators: [`all_of`], [`any_of`], [`not`]
//!
//! # Example
//!
//! ```rust
//! use comkit::mock::matcher::{any_of, bits_set, eq, Matcher};
//!
//! assert!(eq(42).matches(&42));
//! assert!(bits_set(0b0110u32).matches(&0b1110));
//! assert!(any_of(vec![eq(1), eq(2)]).matches(&2));
//! ```

use std::fmt::Debug;
use std::marker::PhantomData;

use regex::Regex;

use crate::Error;

/// A matcher for testing values.
///
/// # Implementing Custom Matchers
///
/// ```rust
/// use comkit::mock::matcher::Matcher;
///
/// struct IsEven;
///
/// impl Matcher<i32> for IsEven {
///     fn matches(&self, value: &i32) -> bool {
///         value % 2 == 0
///     }
///
///     fn describe(&self) -> String {
///         "is even".to_string()
///     }
///
///     fn describe_mismatch(&self, value: &i32) -> String {
///         format!("{} is not even", value)
///     }
/// }
///
/// assert!(IsEven.matches(&4));
/// assert!(!IsEven.matches(&3));
/// ```
pub trait Matcher<T: ?Sized> {
    /// Check if the value matches.
    fn matches(&self, value: &T) -> bool;

    /// Describe what this matcher expects.
    fn describe(&self) -> String;

    /// Describe why a value didn't match.
    fn describe_mismatch(&self, value: &T) -> String;
}

impl<T: ?Sized> Matcher<T> for Box<dyn Matcher<T>> {
    fn matches(&self, value: &T) -> bool {
        (**self).matches(value)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn describe_mismatch(&self, value: &T) -> String {
        (**self).describe_mismatch(value)
    }
}

/// Assert that a value matches a matcher.
///
/// # Panics
///
/// Panics with a descriptive message if the value doesn't match.
///
/// # Example
///
/// ```rust
/// use comkit::{assert_that, mock::matcher::{eq, matches_regex}};
///
/// assert_that!(42, eq(42));
/// assert_that!("E_FAIL".to_string(), matches_regex("E_[A-Z]+"));
/// ```
#[macro_export]
macro_rules! assert_that {
    ($value:expr, $matcher:expr) => {{
        if let ::std::result::Result::Err(mismatch) =
            $crate::mock::matcher::check(&$value, &$matcher)
        {
            panic!("assertion failed: {}", mismatch);
        }
    }};
    ($value:expr, $matcher:expr, $($arg:tt)+) => {{
        if let ::std::result::Result::Err(mismatch) =
            $crate::mock::matcher::check(&$value, &$matcher)
        {
            panic!("assertion failed: {}\n  message: {}", mismatch, format_args!($($arg)+));
        }
    }};
}

/// Runs `matcher` against `value` and renders the mismatch report.
///
/// The matched type comes from `value`, so matchers implemented for several
/// types (like [`RegexMatcher`]) resolve without annotations.
#[doc(hidden)]
pub fn check<T, M>(value: &T, matcher: &M) -> std::result::Result<(), String>
where
    T: ?Sized + Debug,
    M: Matcher<T> + ?Sized,
{
    if matcher.matches(value) {
        return Ok(());
    }
    Err(format!(
        "{}\n  expected: {}\n  got: {:?}",
        matcher.describe_mismatch(value),
        matcher.describe(),
        value
    ))
}

/// Non-panicking [`assert_that!`] for helpers that report failures to their
/// caller.
///
/// # Errors
/// Returns [`Error::AssertionFailed`] with the mismatch report when `value`
/// does not match.
///
/// ```rust
/// use comkit::mock::matcher::{check_that, eq};
///
/// assert!(check_that(&3, eq(3)).is_ok());
/// assert!(check_that(&3, eq(4)).is_err());
/// ```
pub fn check_that<T, M>(value: &T, matcher: M) -> crate::Result<()>
where
    T: ?Sized + Debug,
    M: Matcher<T>,
{
    check(value, &matcher).map_err(Error::assertion_failed)
}

// =============================================================================
// Built-in Matchers
// =============================================================================

/// Create an equality matcher.
pub fn eq<T: PartialEq + Debug>(expected: T) -> EqMatcher<T> {
    EqMatcher { expected }
}

/// Matcher for equality.
pub struct EqMatcher<T> {
    expected: T,
}

impl<T: PartialEq + Debug> Matcher<T> for EqMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        value == &self.expected
    }

    fn describe(&self) -> String {
        format!("equals {:?}", self.expected)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} does not equal {:?}", value, self.expected)
    }
}

/// Create an inequality matcher.
pub fn ne<T: PartialEq + Debug>(unexpected: T) -> NeMatcher<T> {
    NeMatcher { unexpected }
}

/// Matcher for inequality.
pub struct NeMatcher<T> {
    unexpected: T,
}

impl<T: PartialEq + Debug> Matcher<T> for NeMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        value != &self.unexpected
    }

    fn describe(&self) -> String {
        format!("does not equal {:?}", self.unexpected)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} equals {:?}", value, self.unexpected)
    }
}

/// Create a matcher that accepts every value.
///
/// ```rust
/// use comkit::mock::matcher::{anything, Matcher};
///
/// assert!(anything::<()>().matches(&()));
/// ```
pub fn anything<T: ?Sized>() -> AnythingMatcher<T> {
    AnythingMatcher {
        _marker: PhantomData,
    }
}

/// Matcher that accepts every value.
pub struct AnythingMatcher<T: ?Sized> {
    _marker: PhantomData<fn(&T)>,
}

impl<T: ?Sized> Matcher<T> for AnythingMatcher<T> {
    fn matches(&self, _value: &T) -> bool {
        true
    }

    fn describe(&self) -> String {
        "is anything".to_string()
    }

    fn describe_mismatch(&self, _value: &T) -> String {
        String::new()
    }
}

/// Create a matcher from a predicate.
///
/// ```rust
/// use comkit::mock::matcher::{satisfies, Matcher};
///
/// let m = satisfies(|v: &u32| *v > 3, "is greater than 3");
/// assert!(m.matches(&4));
/// assert!(!m.matches(&2));
/// ```
pub fn satisfies<T, F>(predicate: F, description: &str) -> PredicateMatcher<T, F>
where
    F: Fn(&T) -> bool,
{
    PredicateMatcher {
        predicate,
        description: description.to_string(),
        _marker: PhantomData,
    }
}

/// Matcher backed by a predicate.
pub struct PredicateMatcher<T, F> {
    predicate: F,
    description: String,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Debug, F: Fn(&T) -> bool> Matcher<T> for PredicateMatcher<T, F> {
    fn matches(&self, value: &T) -> bool {
        (self.predicate)(value)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} does not satisfy: {}", value, self.description)
    }
}

/// Create a matcher that checks that every bit of `bits` is set.
///
/// ```rust
/// use comkit::mock::matcher::{bits_set, Matcher};
///
/// let m = bits_set(0x11u32);
/// assert!(m.matches(&0x31));
/// assert!(!m.matches(&0x10));
/// ```
pub fn bits_set<T>(bits: T) -> BitsSetMatcher<T>
where
    T: Copy + Debug + PartialEq + std::ops::BitAnd<Output = T>,
{
    BitsSetMatcher { bits }
}

/// Matcher for flag values.
pub struct BitsSetMatcher<T> {
    bits: T,
}

impl<T> Matcher<T> for BitsSetMatcher<T>
where
    T: Copy + Debug + PartialEq + std::ops::BitAnd<Output = T>,
{
    fn matches(&self, value: &T) -> bool {
        (*value & self.bits) == self.bits
    }

    fn describe(&self) -> String {
        format!("has bits {:?} set", self.bits)
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} does not have all of {:?} set", value, self.bits)
    }
}

/// Create a matcher that requires the whole string to match `pattern`.
///
/// # Panics
///
/// Panics if `pattern` is not a valid regular expression. Use
/// [`try_matches_regex`] for patterns built at runtime.
///
/// ```rust
/// use comkit::mock::matcher::{matches_regex, Matcher};
///
/// let m = matches_regex(r"\[\w+\] .+");
/// assert!(m.matches("[Info] started"));
/// assert!(!m.matches("prefix [Info] started"));
/// ```
pub fn matches_regex(pattern: &str) -> RegexMatcher {
    try_matches_regex(pattern).unwrap_or_else(|e| panic!("invalid regex {pattern:?}: {e}"))
}

/// Like [`matches_regex`], but hands back the parse error.
///
/// # Errors
/// Returns the [`regex::Error`] when `pattern` does not compile.
pub fn try_matches_regex(pattern: &str) -> std::result::Result<RegexMatcher, regex::Error> {
    let regex = Regex::new(&format!("^(?:{pattern})$"))?;
    Ok(RegexMatcher {
        pattern: pattern.to_string(),
        regex,
    })
}

/// Matcher for full-string regular expression matches.
pub struct RegexMatcher {
    pattern: String,
    regex: Regex,
}

impl Matcher<str> for RegexMatcher {
    fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    fn describe(&self) -> String {
        format!("matches regex {:?}", self.pattern)
    }

    fn describe_mismatch(&self, value: &str) -> String {
        format!("{:?} does not match regex {:?}", value, self.pattern)
    }
}

impl Matcher<String> for RegexMatcher {
    fn matches(&self, value: &String) -> bool {
        self.regex.is_match(value)
    }

    fn describe(&self) -> String {
        <Self as Matcher<str>>::describe(self)
    }

    fn describe_mismatch(&self, value: &String) -> String {
        <Self as Matcher<str>>::describe_mismatch(self, value)
    }
}

impl Matcher<&str> for RegexMatcher {
    fn matches(&self, value: &&str) -> bool {
        self.regex.is_match(value)
    }

    fn describe(&self) -> String {
        <Self as Matcher<str>>::describe(self)
    }

    fn describe_mismatch(&self, value: &&str) -> String {
        <Self as Matcher<str>>::describe_mismatch(self, value)
    }
}

// =============================================================================
// Combinators
// =============================================================================

/// Create a matcher that requires all matchers to match.
///
/// ```rust
/// use comkit::mock::matcher::{all_of, ne, Matcher};
///
/// let m = all_of(vec![ne(0), ne(1)]);
/// assert!(m.matches(&2));
/// assert!(!m.matches(&1));
/// ```
pub fn all_of<T, M>(matchers: Vec<M>) -> AllOfMatcher<T>
where
    M: Matcher<T> + 'static,
    T: Debug,
{
    AllOfMatcher {
        matchers: matchers
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Matcher<T>>)
            .collect(),
    }
}

/// Matcher that requires every inner matcher to match.
pub struct AllOfMatcher<T: ?Sized> {
    matchers: Vec<Box<dyn Matcher<T>>>,
}

impl<T: Debug> Matcher<T> for AllOfMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        self.matchers.iter().all(|m| m.matches(value))
    }

    fn describe(&self) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("all of [{}]", descriptions.join(", "))
    }

    fn describe_mismatch(&self, value: &T) -> String {
        self.matchers
            .iter()
            .find(|m| !m.matches(value))
            .map(|m| m.describe_mismatch(value))
            .unwrap_or_default()
    }
}

/// Create a matcher that requires at least one matcher to match.
pub fn any_of<T>(matchers: Vec<impl Matcher<T> + 'static>) -> AnyOfMatcher<T>
where
    T: Debug,
{
    AnyOfMatcher {
        matchers: matchers
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Matcher<T>>)
            .collect(),
    }
}

/// Matcher that requires at least one inner matcher to match.
pub struct AnyOfMatcher<T: ?Sized> {
    matchers: Vec<Box<dyn Matcher<T>>>,
}

impl<T: Debug> Matcher<T> for AnyOfMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        self.matchers.iter().any(|m| m.matches(value))
    }

    fn describe(&self) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("any of [{}]", descriptions.join(", "))
    }

    fn describe_mismatch(&self, value: &T) -> String {
        let descriptions: Vec<_> = self.matchers.iter().map(|m| m.describe()).collect();
        format!(
            "{:?} matched none of [{}]",
            value,
            descriptions.join(", ")
        )
    }
}

/// Create a negating matcher.
pub fn not<T, M: Matcher<T> + 'static>(matcher: M) -> NotMatcher<T> {
    NotMatcher {
        inner: Box::new(matcher),
    }
}

/// Matcher that inverts another matcher.
pub struct NotMatcher<T: ?Sized> {
    inner: Box<dyn Matcher<T>>,
}

impl<T: Debug> Matcher<T> for NotMatcher<T> {
    fn matches(&self, value: &T) -> bool {
        !self.inner.matches(value)
    }

    fn describe(&self) -> String {
        format!("not ({})", self.inner.describe())
    }

    fn describe_mismatch(&self, value: &T) -> String {
        format!("{:?} unexpectedly {}", value, self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_and_ne() {
        assert!(eq(5).matches(&5));
        assert!(!eq(5).matches(&6));
        assert!(ne(5).matches(&6));
        assert_eq!(eq(5).describe_mismatch(&6), "6 does not equal 5");
    }

    #[test]
    fn test_bits_set() {
        let m = bits_set(0b1010u8);
        assert!(m.matches(&0b1010));
        assert!(m.matches(&0b1111));
        assert!(!m.matches(&0b1000));
        assert!(bits_set(0u8).matches(&0));
    }

    #[test]
    fn test_matches_regex_is_anchored() {
        let m = matches_regex("a|b");
        assert!(m.matches("a"));
        assert!(m.matches("b"));
        assert!(!m.matches("ab"));
        assert!(Matcher::<String>::matches(&m, &"b".to_string()));
        assert!(Matcher::<&str>::matches(&m, &"a"));
    }

    #[test]
    #[should_panic(expected = "invalid regex")]
    fn test_matches_regex_rejects_bad_pattern() {
        let _ = matches_regex("(");
    }

    #[test]
    fn test_try_matches_regex_reports_bad_pattern() {
        assert!(try_matches_regex("(").is_err());
        let m = try_matches_regex(r"\d{2}").unwrap();
        assert!(m.matches("42"));
        assert!(!m.matches("421"));
    }

    #[test]
    fn test_combinators() {
        let m = all_of(vec![ne(1), ne(2)]);
        assert!(m.matches(&3));
        assert_eq!(m.describe_mismatch(&2), "2 equals 2");

        let m = any_of(vec![eq(1), eq(2)]);
        assert!(m.matches(&2));
        assert!(!m.matches(&3));
        assert!(m.describe().starts_with("any of"));

        let m = not(eq(0));
        assert!(m.matches(&1));
        assert!(!m.matches(&0));
    }

    #[test]
    fn test_boxed_matcher() {
        let m: Box<dyn Matcher<i32>> = Box::new(eq(3));
        assert!(m.matches(&3));
        assert_eq!(m.describe(), "equals 3");
    }

    #[test]
    fn test_assert_that_passes() {
        assert_that!(10, satisfies(|v: &i32| v % 5 == 0, "is a multiple of 5"));
    }

    #[test]
    #[should_panic(expected = "does not equal")]
    fn test_assert_that_fails() {
        assert_that!(1, eq(2), "values differ");
    }

    #[test]
    fn test_assert_that_with_regex() {
        let owned = String::from("call failed: E_FAIL");
        assert_that!(owned, matches_regex("call failed: .+"));
        assert_that!("[Info] ok", matches_regex(r"\[\w+\] .*"));

        let lines = ["[Debug] first".to_string()];
        assert_that!(lines[0].as_str(), matches_regex(r"\[Debug\] \w+"));
    }

    #[test]
    #[should_panic(expected = "does not match regex")]
    fn test_assert_that_with_regex_fails() {
        assert_that!(String::from("oops"), matches_regex("ok"), "status line");
    }

    #[test]
    fn test_check_that_returns_error() {
        assert_eq!(check_that(&7, eq(7)), Ok(()));

        let err = check_that("abc", matches_regex("x+")).unwrap_err();
        assert!(matches!(err, Error::AssertionFailed(_)));
        assert!(err.to_string().starts_with("assertion failed: \"abc\" does not match regex"));
    }
}
