//! Test rules: which inputs to ignore or skip, and per-run resource limits.
//!
//! Rules are loaded once before a batch starts and shared read-only by every
//! worker.
//!
//! ```json
//! {
//!     "tests.ignore": ["flaky/"],
//!     "tests.skip": ["huge/"],
//!     "timeout.seconds": 300,
//!     "memory.bytes": 8000000000
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default per-invocation wall-clock limit.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Default per-child address-space ceiling.
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 8_000_000_000;

/// Errors loading a rules file.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("rules file not found: {0}")]
    NotFound(String),

    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rules file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

/// Ignore/skip patterns and resource limits for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Substrings of input paths whose results are tracked but excluded from
    /// the failure tally.
    #[serde(rename = "tests.ignore", default)]
    pub ignore: BTreeSet<String>,

    /// Substrings of input paths that are never executed.
    #[serde(rename = "tests.skip", default)]
    pub skip: BTreeSet<String>,

    #[serde(
        rename = "timeout.seconds",
        default = "default_timeout",
        deserialize_with = "number_or_string"
    )]
    pub timeout_seconds: u64,

    #[serde(
        rename = "memory.bytes",
        default = "default_memory",
        deserialize_with = "number_or_string"
    )]
    pub memory_limit_bytes: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_memory() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

/// Accept `300`, `"300"` and `8e9` alike.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) if f >= 0.0 && f.is_finite() => Ok(f as u64),
        Raw::Float(f) => Err(serde::de::Error::custom(format!("invalid limit {}", f))),
        Raw::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<u64>()
                .or_else(|_| trimmed.parse::<f64>().map(|f| f as u64))
                .map_err(|_| serde::de::Error::custom(format!("invalid limit {:?}", s)))
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            ignore: BTreeSet::new(),
            skip: BTreeSet::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }
}

impl RuleSet {
    /// Load rules from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        if !path.exists() {
            return Err(RulesError::NotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rules: RuleSet = serde_json::from_str(&raw).map_err(|source| RulesError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Parse rules from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, RulesError> {
        let rules: RuleSet = serde_json::from_str(json).map_err(|source| RulesError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        if self.timeout_seconds == 0 {
            return Err(RulesError::ZeroLimit {
                field: "timeout.seconds",
            });
        }
        if self.memory_limit_bytes == 0 {
            return Err(RulesError::ZeroLimit {
                field: "memory.bytes",
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether results for `path` are known-flaky.
    pub fn should_ignore(&self, path: &str) -> bool {
        self.ignore.iter().any(|pat| path.contains(pat.as_str()))
    }

    /// Whether `path` is excluded from execution.
    pub fn should_skip(&self, path: &str) -> bool {
        self.skip.iter().any(|pat| path.contains(pat.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let rules = RuleSet::default();
        assert_eq!(rules.timeout_seconds, 300);
        assert_eq!(rules.memory_limit_bytes, 8_000_000_000);
        assert!(!rules.should_ignore("/a/b.bc"));
        assert!(!rules.should_skip("/a/b.bc"));
    }

    #[test]
    fn test_parse_full() {
        let rules = RuleSet::from_json(
            r#"{
                "tests.ignore": ["flaky/", "known_bad"],
                "tests.skip": ["huge/"],
                "timeout.seconds": 60,
                "memory.bytes": 1000000
            }"#,
        )
        .unwrap();
        assert_eq!(rules.timeout(), Duration::from_secs(60));
        assert_eq!(rules.memory_limit_bytes, 1_000_000);
        assert!(rules.should_ignore("/corpus/flaky/a.bc"));
        assert!(rules.should_ignore("/corpus/x/known_bad.bc"));
        assert!(!rules.should_ignore("/corpus/good/a.bc"));
        assert!(rules.should_skip("/corpus/huge/b.bc"));
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let rules = RuleSet::from_json(r#"{"tests.skip": ["x"]}"#).unwrap();
        assert!(rules.ignore.is_empty());
        assert_eq!(rules.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(rules.memory_limit_bytes, DEFAULT_MEMORY_LIMIT_BYTES);
    }

    #[test]
    fn test_string_and_float_limits() {
        let rules =
            RuleSet::from_json(r#"{"timeout.seconds": "45", "memory.bytes": 8e9}"#).unwrap();
        assert_eq!(rules.timeout_seconds, 45);
        assert_eq!(rules.memory_limit_bytes, 8_000_000_000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = RuleSet::from_json(r#"{"timeout.seconds": 0}"#).unwrap_err();
        assert!(matches!(err, RulesError::ZeroLimit { .. }));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(matches!(
            RuleSet::from_json(r#"{"tests.ignore": "notalist"}"#),
            Err(RulesError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"tests.ignore": ["a"]}}"#).unwrap();
        let rules = RuleSet::load(file.path()).unwrap();
        assert!(rules.should_ignore("xay"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuleSet::load(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, RulesError::NotFound(_)));
    }
}
