//! Raw process outcomes.

use serde::{Deserialize, Serialize};

/// Legacy status sentinel for a zero-length or missing output artifact.
pub const STATUS_ZERO_SIZED_OUTPUT: i32 = -129;
/// Legacy status sentinel for a process that could not be started.
pub const STATUS_OS_ERROR: i32 = -130;
/// Legacy status sentinel for a process killed at the deadline.
pub const STATUS_TIMEOUT: i32 = -131;

/// What happened when a tool was run, before any log inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RawOutcome {
    /// Exit code 0 and a non-empty output artifact.
    Success,
    /// Ordinary nonzero exit code.
    Exited(i32),
    /// Terminated by a signal (signal number).
    Signaled(i32),
    /// Exceeded the wall-clock deadline and was killed.
    Timeout,
    /// The process could not be started.
    OsError(String),
    /// Exit code 0 but the output artifact was missing or empty.
    ZeroSizedOutput,
}

impl RawOutcome {
    /// Build an outcome from an exit code / signal pair as reported by the OS.
    ///
    /// A code of 0 maps to `Success`; callers still have to check the output
    /// artifact before trusting it.
    pub fn from_exit(code: Option<i32>, signal: Option<i32>) -> Self {
        match (code, signal) {
            (Some(0), _) => RawOutcome::Success,
            (Some(c), _) => RawOutcome::Exited(c),
            (None, Some(s)) => RawOutcome::Signaled(s),
            (None, None) => RawOutcome::OsError("process exited without status".to_string()),
        }
    }

    /// Decode the legacy signed status encoding.
    pub fn from_status_code(status: i32) -> Self {
        match status {
            0 => RawOutcome::Success,
            STATUS_ZERO_SIZED_OUTPUT => RawOutcome::ZeroSizedOutput,
            STATUS_OS_ERROR => RawOutcome::OsError(String::new()),
            STATUS_TIMEOUT => RawOutcome::Timeout,
            s if s < 0 => RawOutcome::Signaled(-s),
            c => RawOutcome::Exited(c),
        }
    }

    /// Legacy signed status: 0 success, positive exit codes as-is, negative
    /// signal numbers, and fixed sentinels for internal failure modes.
    pub fn status_code(&self) -> i32 {
        match self {
            RawOutcome::Success => 0,
            RawOutcome::Exited(c) => *c,
            RawOutcome::Signaled(s) => -s,
            RawOutcome::Timeout => STATUS_TIMEOUT,
            RawOutcome::OsError(_) => STATUS_OS_ERROR,
            RawOutcome::ZeroSizedOutput => STATUS_ZERO_SIZED_OUTPUT,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RawOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exit() {
        assert_eq!(RawOutcome::from_exit(Some(0), None), RawOutcome::Success);
        assert_eq!(RawOutcome::from_exit(Some(1), None), RawOutcome::Exited(1));
        assert_eq!(RawOutcome::from_exit(None, Some(11)), RawOutcome::Signaled(11));
        assert!(matches!(RawOutcome::from_exit(None, None), RawOutcome::OsError(_)));
    }

    #[test]
    fn test_status_code_sentinels() {
        assert_eq!(RawOutcome::Timeout.status_code(), -131);
        assert_eq!(RawOutcome::OsError("x".into()).status_code(), -130);
        assert_eq!(RawOutcome::ZeroSizedOutput.status_code(), -129);
        assert_eq!(RawOutcome::Signaled(6).status_code(), -6);
        assert_eq!(RawOutcome::Exited(2).status_code(), 2);
    }

    #[test]
    fn test_from_status_code() {
        assert_eq!(RawOutcome::from_status_code(-131), RawOutcome::Timeout);
        assert_eq!(RawOutcome::from_status_code(-11), RawOutcome::Signaled(11));
        assert_eq!(RawOutcome::from_status_code(1), RawOutcome::Exited(1));
        assert_eq!(RawOutcome::from_status_code(0), RawOutcome::Success);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&RawOutcome::Signaled(6)).unwrap();
        assert_eq!(json, r#"{"kind":"signaled","detail":6}"#);
        let parsed: RawOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RawOutcome::Signaled(6));
    }
}
