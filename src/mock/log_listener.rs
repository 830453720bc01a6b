//! Records the debug lines and events that code under test logs.
//!
//! Code that logs writes through a [`LogSink`]. In tests the sink is a
//! [`LogListener`], which parses each debug line into one `debug` call per
//! cause (root cause first) plus one for the message itself, and each event
//! into an `event` call followed by one `event_arg` call per user argument.
//!
//! A debug line has the form
//!
//! ```text
//! [Level] [pid] Message
//! \tat file(line) (function)
//! \tcaused by: Cause
//! \t\tat file(line) (function)
//! ```
//!
//! with any number of `caused by` blocks. Lines in other formats are
//! ignored.
//!
//! # Examples
//! ```
//! use comkit::mock::matcher::eq;
//! use comkit::mock::{DebugArgs, LogListener, LogListenerMode, LogSink};
//!
//! let log = LogListener::new(LogListenerMode::StrictDebug);
//! log.debug_method().expect_call(eq(DebugArgs::new("Info", "started")));
//!
//! log.output_debug_string("[Info] [42] started\n\tat main.rs(7) (main)\n");
//! assert!(log.debug_method().verify().is_ok());
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::matcher::{anything, Matcher};
use super::{MockMethod, Times};

static LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(.+?)\] \[\d+\] (.+)\n\tat .+\(\d+\) \(\w+\)\n((?:\tcaused by: .+\n\t\tat .+\(\d+\) \(\w+\)\n)*)$",
    )
    .expect("valid debug line pattern")
});

static CAUSE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\tcaused by: (.+)\n\t\tat .+\(\d+\) \(\w+\)\n").expect("valid cause pattern")
});

/// Number of trailing event arguments the logger adds on its own (source
/// file and line). They are not reported as user arguments.
pub const IMPLICIT_EVENT_ARGS: usize = 2;

/// Where code under test sends its diagnostics.
pub trait LogSink {
    /// Receives one formatted debug line.
    fn output_debug_string(&self, text: &str);

    /// Receives one structured event. `data` holds the user arguments
    /// followed by the [`IMPLICIT_EVENT_ARGS`].
    fn write_event(&self, event: &EventDescriptor, data: &[&[u8]]);
}

/// Which channels fail the test when they log without an expectation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogListenerMode {
    /// Everything may be logged.
    #[default]
    Lazy,
    /// Events need an expectation.
    StrictEvent,
    /// Debug lines need an expectation.
    StrictDebug,
    /// Both need an expectation.
    StrictAll,
}

impl LogListenerMode {
    pub fn is_strict_debug(self) -> bool {
        matches!(self, Self::StrictDebug | Self::StrictAll)
    }

    pub fn is_strict_event(self) -> bool {
        matches!(self, Self::StrictEvent | Self::StrictAll)
    }
}

/// The identifying part of an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventDescriptor {
    pub id: u16,
    pub level: u8,
    pub keyword: u64,
}

/// Arguments of a recorded `debug` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugArgs {
    pub level: String,
    pub message: String,
}

impl DebugArgs {
    pub fn new(level: &str, message: &str) -> Self {
        Self {
            level: level.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Arguments of a recorded `event` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventArgs {
    pub id: u16,
    pub level: u8,
    pub keyword: u64,
    pub arg_count: u32,
}

/// Arguments of a recorded `event_arg` call. `data` is a copy of the
/// argument bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventArgArgs {
    pub index: u32,
    pub size: u32,
    pub data: Vec<u8>,
}

/// Matches `debug` calls whose message satisfies `matcher`, at any level.
pub fn with_message(matcher: impl Matcher<String> + 'static) -> MessageMatcher {
    MessageMatcher {
        inner: Box::new(matcher),
    }
}

/// Matcher returned by [`with_message`].
pub struct MessageMatcher {
    inner: Box<dyn Matcher<String>>,
}

impl Matcher<DebugArgs> for MessageMatcher {
    fn matches(&self, value: &DebugArgs) -> bool {
        self.inner.matches(&value.message)
    }

    fn describe(&self) -> String {
        format!("message {}", self.inner.describe())
    }

    fn describe_mismatch(&self, value: &DebugArgs) -> String {
        self.inner.describe_mismatch(&value.message)
    }
}

/// A [`LogSink`] that records into three mocked methods.
///
/// The mode installs a base expectation per channel: `Times::never()` for a
/// strict channel and `Times::any()` otherwise. `event_arg` is always
/// allowed. Expectations added by the test take precedence over the base.
pub struct LogListener {
    debug: MockMethod<DebugArgs, ()>,
    event: MockMethod<EventArgs, ()>,
    event_arg: MockMethod<EventArgArgs, ()>,
}

impl LogListener {
    pub fn new(mode: LogListenerMode) -> Self {
        let listener = Self {
            debug: MockMethod::new("Debug"),
            event: MockMethod::new("Event"),
            event_arg: MockMethod::new("EventArg"),
        };
        listener.debug.expect_call(anything()).times(base_times(mode.is_strict_debug()));
        listener.event.expect_call(anything()).times(base_times(mode.is_strict_event()));
        listener.event_arg.expect_call(anything()).times(Times::any());
        listener
    }

    pub fn debug_method(&self) -> &MockMethod<DebugArgs, ()> {
        &self.debug
    }

    pub fn event_method(&self) -> &MockMethod<EventArgs, ()> {
        &self.event
    }

    pub fn event_arg_method(&self) -> &MockMethod<EventArgArgs, ()> {
        &self.event_arg
    }

    pub fn debug(&self, level: &str, message: &str) {
        self.debug.call(&mut DebugArgs::new(level, message));
    }

    pub fn event(&self, id: u16, level: u8, keyword: u64, arg_count: u32) {
        self.event.call(&mut EventArgs {
            id,
            level,
            keyword,
            arg_count,
        });
    }

    pub fn event_arg(&self, index: u32, data: &[u8]) {
        self.event_arg.call(&mut EventArgArgs {
            index,
            size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            data: data.to_vec(),
        });
    }

    /// Verifies all three methods and clears their expectations, including
    /// the ones installed by the mode.
    ///
    /// # Errors
    /// Returns the first verification failure.
    pub fn verify_and_clear(&self) -> crate::Result<()> {
        let debug = self.debug.verify_and_clear();
        let event = self.event.verify_and_clear();
        let event_arg = self.event_arg.verify_and_clear();
        debug.and(event).and(event_arg)
    }
}

fn base_times(strict: bool) -> Times {
    if strict {
        Times::never()
    } else {
        Times::any()
    }
}

impl Default for LogListener {
    fn default() -> Self {
        Self::new(LogListenerMode::default())
    }
}

impl LogSink for LogListener {
    fn output_debug_string(&self, text: &str) {
        let Some(line) = LINE_PATTERN.captures(text) else {
            trace!(text, "ignoring unformatted debug output");
            return;
        };
        let level = &line[1];
        let causes: Vec<&str> = CAUSE_PATTERN
            .captures_iter(&line[3])
            .filter_map(|cause| cause.get(1))
            .map(|cause| cause.as_str())
            .collect();
        for cause in causes.iter().rev() {
            self.debug(level, cause);
        }
        self.debug(level, &line[2]);
    }

    fn write_event(&self, event: &EventDescriptor, data: &[&[u8]]) {
        let user_args = data.len().saturating_sub(IMPLICIT_EVENT_ARGS);
        self.event(
            event.id,
            event.level,
            event.keyword,
            u32::try_from(user_args).unwrap_or(u32::MAX),
        );
        for (index, arg) in (0u32..).zip(&data[..user_args]) {
            self.event_arg(index, arg);
        }
    }
}

impl fmt::Debug for LogListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogListener")
            .field("debug", &self.debug)
            .field("event", &self.event)
            .field("event_arg", &self.event_arg)
            .finish()
    }
}
