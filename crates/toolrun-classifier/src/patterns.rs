//! Log-scraping patterns.
//!
//! A `LogPattern` pulls a short signature (usually `<file>:<line>`) out of
//! captured stderr. Patterns are best-effort: two unrelated bugs that log the
//! same shape merge into one bucket, and one bug with slightly different logs
//! may split across several.

use regex_lite::{Captures, Regex};
use thiserror::Error;

/// Errors building a custom pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern {name}: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex_lite::Error,
    },

    #[error("pattern {name} references capture group {group} but has {available}")]
    MissingGroup {
        name: String,
        group: usize,
        available: usize,
    },
}

/// Which matching line wins when several lines match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// Top-to-bottom, first match wins.
    First,
    /// Bottom-to-top, last match wins.
    Last,
}

/// How a signature is built from a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Use one capture group verbatim.
    Group(usize),
    /// Join two capture groups as `<file>:<line>`.
    FileLine { file: usize, line: usize },
    /// Whole match with the `error: ` prefix and quotes dropped and spaces
    /// replaced by underscores.
    Slug,
}

/// One (pattern, extractor) rule.
#[derive(Debug, Clone)]
pub struct LogPattern {
    name: String,
    triggers: Vec<String>,
    line_prefix: Option<String>,
    regex: Regex,
    scan: ScanOrder,
    extraction: Extraction,
}

impl LogPattern {
    /// Create a pattern that scans bottom-to-top and returns group 1.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, PatternError> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
            name: name.clone(),
            source,
        })?;
        let mut built = Self {
            name,
            triggers: Vec::new(),
            line_prefix: None,
            regex,
            scan: ScanOrder::Last,
            extraction: Extraction::Group(0),
        };
        if built.regex.captures_len() > 1 {
            built.extraction = Extraction::Group(1);
        }
        Ok(built)
    }

    /// Only consider this pattern when the log contains one of `needles`.
    pub fn triggered_by(mut self, needles: &[&str]) -> Self {
        self.triggers = needles.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Only scan lines beginning with `prefix`.
    pub fn on_lines_starting_with(mut self, prefix: &str) -> Self {
        self.line_prefix = Some(prefix.to_string());
        self
    }

    pub fn scan(mut self, order: ScanOrder) -> Self {
        self.scan = order;
        self
    }

    /// Set the extractor, checking that the referenced groups exist.
    pub fn extract_with(mut self, extraction: Extraction) -> Result<Self, PatternError> {
        let available = self.regex.captures_len() - 1;
        let highest = match extraction {
            Extraction::Group(g) => g,
            Extraction::FileLine { file, line } => file.max(line),
            Extraction::Slug => 0,
        };
        if highest > available {
            return Err(PatternError::MissingGroup {
                name: self.name,
                group: highest,
                available,
            });
        }
        self.extraction = extraction;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this pattern applies to `log` at all.
    pub fn is_triggered(&self, log: &str) -> bool {
        self.triggers.is_empty() || self.triggers.iter().any(|t| log.contains(t.as_str()))
    }

    /// Extract a signature from `log`, or `None` if nothing matches.
    pub fn extract(&self, log: &str) -> Option<String> {
        if !self.is_triggered(log) {
            return None;
        }
        match self.scan {
            ScanOrder::First => log.lines().find_map(|ln| self.extract_line(ln)),
            ScanOrder::Last => log.lines().rev().find_map(|ln| self.extract_line(ln)),
        }
    }

    fn extract_line(&self, line: &str) -> Option<String> {
        if let Some(prefix) = &self.line_prefix {
            if !line.starts_with(prefix.as_str()) {
                return None;
            }
        }
        let caps = self.regex.captures(line)?;
        let signature = self.render(&caps)?;
        if signature.is_empty() {
            None
        } else {
            Some(signature)
        }
    }

    fn render(&self, caps: &Captures<'_>) -> Option<String> {
        match self.extraction {
            Extraction::Group(g) => caps.get(g).map(|m| m.as_str().to_string()),
            Extraction::FileLine { file, line } => {
                let file = caps.get(file)?.as_str();
                let line = caps.get(line)?.as_str();
                Some(format!("{}:{}", file, line))
            }
            Extraction::Slug => {
                let whole = caps.get(0)?.as_str();
                Some(
                    whole
                        .replace("error: ", "")
                        .replace('\'', "")
                        .replace(' ', "_"),
                )
            }
        }
    }
}

/// Address/undefined-behaviour sanitizer report, e.g.
/// `SUMMARY: AddressSanitizer: heap-use-after-free /src/foo.c:42:5 in main`.
pub fn sanitizer_report() -> LogPattern {
    builtin("sanitizer", r"AddressSanitizer: [a-zA-Z\-]+ .*/([^:]+:\d+)")
        .triggered_by(&["AddressSanitizer"])
}

/// clang-style diagnostics ending in `N error(s) generated.`
pub fn compiler_error() -> LogPattern {
    builtin("compiler-error", r"error: ([\w']+) *([\w']*) *([\w']+) *([\w']+)")
        .triggered_by(&["errors generated.", "error generated."])
        .with_extraction(Extraction::Slug)
}

/// Python traceback frame: `File ".../lifter.py", line 120, in lift`.
pub fn python_traceback() -> LogPattern {
    builtin("python-traceback", r#"([^/\s]+\.py)", line (\d+)"#)
        .with_extraction(Extraction::FileLine { file: 1, line: 2 })
}

/// glog fatal line: `F0415 05:22:54.866288 437680 IRToASTVisitor.cpp:123] ...`.
/// The first fatal line is the originating fault.
pub fn fatal_log() -> LogPattern {
    builtin("fatal-log", r"([^/\s]+\.[^/\s]+:\d+)")
        .on_lines_starting_with("F")
        .scan(ScanOrder::First)
}

/// Any `<file>.<ext>:<line>` reference, scanned bottom-up, e.g.
/// `UNREACHABLE executed at .../APFloat.cpp:154!`.
pub fn source_location() -> LogPattern {
    builtin("source-location", r"([^/\s]+\.[^/\s]+:\d+)")
}

// Built-in patterns are literals covered by tests; a failure here is a
// programming error rather than a runtime condition.
fn builtin(name: &str, pattern: &str) -> LogPattern {
    match LogPattern::new(name, pattern) {
        Ok(p) => p,
        Err(e) => panic!("built-in pattern is invalid: {}", e),
    }
}

impl LogPattern {
    fn with_extraction(self, extraction: Extraction) -> Self {
        match self.extract_with(extraction) {
            Ok(p) => p,
            Err(e) => panic!("built-in pattern is invalid: {}", e),
        }
    }
}
