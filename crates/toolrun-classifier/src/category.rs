//! Result categories.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Signal numbers the classifier names explicitly.
pub mod signals {
    #[cfg(unix)]
    pub const SIGILL: i32 = libc::SIGILL;
    #[cfg(unix)]
    pub const SIGABRT: i32 = libc::SIGABRT;
    #[cfg(unix)]
    pub const SIGBUS: i32 = libc::SIGBUS;
    #[cfg(unix)]
    pub const SIGSEGV: i32 = libc::SIGSEGV;

    #[cfg(not(unix))]
    pub const SIGILL: i32 = 4;
    #[cfg(not(unix))]
    pub const SIGABRT: i32 = 6;
    #[cfg(not(unix))]
    pub const SIGBUS: i32 = 7;
    #[cfg(not(unix))]
    pub const SIGSEGV: i32 = 11;
}

/// Final classification of one invocation.
///
/// The string form (see `Display`) is used both as the result directory name
/// and as the `output.<category>` stats key, so it must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultCategory {
    Success,
    Timeout,
    OsError,
    ZeroSizedOutput,
    Sigsegv,
    Sigabrt,
    Sigbus,
    Sigill,
    AssertionFailure,
    /// Unrecognised exit code.
    UnknownExit(i32),
    /// Unrecognised signal.
    UnknownSignal(i32),
    /// Fine-grained signature extracted from logs, e.g. `foo.c:42`.
    Located(String),
}

impl ResultCategory {
    /// Category for a bare signal number, without log inspection.
    pub fn for_signal(signo: i32) -> Self {
        match signo {
            signals::SIGSEGV => ResultCategory::Sigsegv,
            signals::SIGABRT => ResultCategory::Sigabrt,
            signals::SIGBUS => ResultCategory::Sigbus,
            signals::SIGILL => ResultCategory::Sigill,
            other => ResultCategory::UnknownSignal(other),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultCategory::Success)
    }

    /// True when the category came from log scraping rather than a fixed name.
    pub fn is_located(&self) -> bool {
        matches!(self, ResultCategory::Located(_))
    }

    /// Parse the string form back into a category.
    ///
    /// Anything that is not a fixed name is treated as a located signature.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => ResultCategory::Success,
            "timeout" => ResultCategory::Timeout,
            "os-error" => ResultCategory::OsError,
            "zero-sized-output" => ResultCategory::ZeroSizedOutput,
            "sigsegv" => ResultCategory::Sigsegv,
            "sigabrt" => ResultCategory::Sigabrt,
            "sigbus" => ResultCategory::Sigbus,
            "sigill" => ResultCategory::Sigill,
            "assertion-failure" => ResultCategory::AssertionFailure,
            _ => {
                if let Some(rest) = s.strip_prefix("unknown-sig") {
                    if let Ok(n) = rest.parse() {
                        return ResultCategory::UnknownSignal(n);
                    }
                }
                if let Some(rest) = s.strip_prefix("unknown-") {
                    if let Ok(n) = rest.parse() {
                        return ResultCategory::UnknownExit(n);
                    }
                }
                ResultCategory::Located(s.to_string())
            }
        }
    }
}

impl fmt::Display for ResultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCategory::Success => f.write_str("success"),
            ResultCategory::Timeout => f.write_str("timeout"),
            ResultCategory::OsError => f.write_str("os-error"),
            ResultCategory::ZeroSizedOutput => f.write_str("zero-sized-output"),
            ResultCategory::Sigsegv => f.write_str("sigsegv"),
            ResultCategory::Sigabrt => f.write_str("sigabrt"),
            ResultCategory::Sigbus => f.write_str("sigbus"),
            ResultCategory::Sigill => f.write_str("sigill"),
            ResultCategory::AssertionFailure => f.write_str("assertion-failure"),
            ResultCategory::UnknownExit(code) => write!(f, "unknown-{}", code),
            ResultCategory::UnknownSignal(signo) => write!(f, "unknown-sig{}", signo),
            ResultCategory::Located(sig) => f.write_str(sig),
        }
    }
}

impl Serialize for ResultCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResultCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ResultCategory::parse(&s))
    }
}
