//! Failure classifier for external tool invocations.
//!
//! Maps a raw process outcome plus captured stderr to a `ResultCategory`.
//! Crashes are bucketed by the most specific source location that can be
//! pulled out of the log; when nothing can be extracted the generic
//! signal/status name is used instead.

mod category;
mod outcome;
mod patterns;

pub use category::{signals, ResultCategory};
pub use outcome::{RawOutcome, STATUS_OS_ERROR, STATUS_TIMEOUT, STATUS_ZERO_SIZED_OUTPUT};
pub use patterns::{
    compiler_error, fatal_log, python_traceback, sanitizer_report, source_location, Extraction,
    LogPattern, PatternError, ScanOrder,
};

/// Exit code tools use for "something failed" (assertions, diagnostics,
/// uncaught exceptions).
pub const GENERIC_FAILURE_CODE: i32 = 1;

/// Failure signals that have their own ordered pattern list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// Exit code `GENERIC_FAILURE_CODE`.
    GenericFailure,
    /// Killed by SIGABRT.
    Abort,
}

/// Outcome classifier with pluggable log patterns.
#[derive(Debug, Clone)]
pub struct Classifier {
    generic_failure: Vec<LogPattern>,
    abort: Vec<LogPattern>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            generic_failure: vec![sanitizer_report(), compiler_error(), python_traceback()],
            abort: vec![fatal_log(), source_location()],
        }
    }
}

impl Classifier {
    /// Classifier with no log patterns; only fixed names are produced.
    pub fn without_patterns() -> Self {
        Self {
            generic_failure: Vec::new(),
            abort: Vec::new(),
        }
    }

    /// Replace the pattern list for one failure signal.
    pub fn with_rules(mut self, signal: FailureSignal, patterns: Vec<LogPattern>) -> Self {
        *self.rules_mut(signal) = patterns;
        self
    }

    /// Append a pattern with the lowest priority for `signal`.
    pub fn push_rule(&mut self, signal: FailureSignal, pattern: LogPattern) {
        self.rules_mut(signal).push(pattern);
    }

    pub fn rules(&self, signal: FailureSignal) -> &[LogPattern] {
        match signal {
            FailureSignal::GenericFailure => &self.generic_failure,
            FailureSignal::Abort => &self.abort,
        }
    }

    fn rules_mut(&mut self, signal: FailureSignal) -> &mut Vec<LogPattern> {
        match signal {
            FailureSignal::GenericFailure => &mut self.generic_failure,
            FailureSignal::Abort => &mut self.abort,
        }
    }

    /// Classify one outcome.
    pub fn categorize(&self, outcome: &RawOutcome, stderr: &str) -> ResultCategory {
        match outcome {
            RawOutcome::Success => ResultCategory::Success,
            RawOutcome::Timeout => ResultCategory::Timeout,
            RawOutcome::OsError(_) => ResultCategory::OsError,
            RawOutcome::ZeroSizedOutput => ResultCategory::ZeroSizedOutput,
            RawOutcome::Exited(GENERIC_FAILURE_CODE) => {
                self.locate(FailureSignal::GenericFailure, stderr)
                    .unwrap_or(ResultCategory::AssertionFailure)
            }
            RawOutcome::Exited(code) => ResultCategory::UnknownExit(*code),
            RawOutcome::Signaled(signals::SIGABRT) => self
                .locate(FailureSignal::Abort, stderr)
                .unwrap_or(ResultCategory::Sigabrt),
            RawOutcome::Signaled(signo) => ResultCategory::for_signal(*signo),
        }
    }

    /// First pattern (in priority order) that yields a signature.
    fn locate(&self, signal: FailureSignal, stderr: &str) -> Option<ResultCategory> {
        if stderr.is_empty() {
            return None;
        }
        self.rules(signal)
            .iter()
            .find_map(|p| p.extract(stderr))
            .map(ResultCategory::Located)
    }

    /// Name of the pattern that would produce the category, for diagnostics.
    pub fn explain(&self, outcome: &RawOutcome, stderr: &str) -> Option<&str> {
        let signal = match outcome {
            RawOutcome::Exited(GENERIC_FAILURE_CODE) => FailureSignal::GenericFailure,
            RawOutcome::Signaled(signals::SIGABRT) => FailureSignal::Abort,
            _ => return None,
        };
        self.rules(signal)
            .iter()
            .find(|p| p.extract(stderr).is_some())
            .map(|p| p.name())
    }
}
