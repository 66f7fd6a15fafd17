//! Run-wide statistics.
//!
//! `Stats` is shared by every worker of a batch. All mutation goes through a
//! single mutex that is held only for one map update, never across process
//! execution.

mod report;

pub use report::{format_elapsed, RunTotals};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use toolrun_classifier::ResultCategory;
use tracing::warn;

use crate::rules::RuleSet;

/// Number of invocations whose outcome is known.
pub const PROGRAM_RUNS: &str = "program_runs";
/// Number of invocations killed at the deadline.
pub const PROGRAM_TIMEOUTS: &str = "program_timeouts";
/// Inputs dropped by skip rules before execution.
pub const SKIPPED_INPUTS: &str = "skipped_inputs";
/// Result directories that could not be written.
pub const ARCHIVE_ERRORS: &str = "archive_errors";
pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";

/// Prefix of per-category example lists.
pub const OUTPUT_PREFIX: &str = "output.";
/// Ignored inputs whose tool run succeeded.
pub const IGNORE_SUCCESS: &str = "output.ignore-success";
/// Ignored inputs whose tool run failed.
pub const IGNORE_FAIL: &str = "output.ignore-fail";

/// Errors saving or loading a stats snapshot.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid stats snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// One stat entry: a counter, a text scalar or an ordered list of examples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Count(u64),
    List(Vec<String>),
    Text(String),
}

impl StatValue {
    /// Counter value, or number of entries for a list.
    pub fn magnitude(&self) -> u64 {
        match self {
            StatValue::Count(n) => *n,
            StatValue::List(items) => items.len() as u64,
            StatValue::Text(_) => 0,
        }
    }
}

impl From<u64> for StatValue {
    fn from(n: u64) -> Self {
        StatValue::Count(n)
    }
}

impl From<String> for StatValue {
    fn from(s: String) -> Self {
        StatValue::Text(s)
    }
}

impl From<&str> for StatValue {
    fn from(s: &str) -> Self {
        StatValue::Text(s.to_string())
    }
}

impl From<Vec<String>> for StatValue {
    fn from(items: Vec<String>) -> Self {
        StatValue::List(items)
    }
}

/// Owned copy of the stats at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Entries keyed by name.
    pub values: BTreeMap<String, StatValue>,
    /// Keys in first-insertion order.
    pub order: Vec<String>,
}

impl StatsSnapshot {
    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.values.get(key)
    }

    pub fn magnitude(&self, key: &str) -> u64 {
        self.values.get(key).map(StatValue::magnitude).unwrap_or(0)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(StatValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct StatsState {
    values: BTreeMap<String, StatValue>,
    first_seen: HashMap<String, u64>,
    next_seq: u64,
}

impl StatsState {
    fn touch(&mut self, key: &str) {
        if !self.first_seen.contains_key(key) {
            self.first_seen.insert(key.to_string(), self.next_seq);
            self.next_seq += 1;
        }
    }
}

/// Thread-safe accumulator of counters and example lists.
#[derive(Debug)]
pub struct Stats {
    state: Mutex<StatsState>,
    rules: Arc<RuleSet>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(Arc::new(RuleSet::default()))
    }
}

impl Stats {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            state: Mutex::new(StatsState::default()),
            rules,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn lock(&self) -> MutexGuard<'_, StatsState> {
        // A worker that panicked mid-update leaves a complete map behind;
        // keep accumulating rather than losing the whole run.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `value` to the list at `key`.
    pub fn add_stat(&self, key: &str, value: impl Into<String>) {
        let mut state = self.lock();
        state.touch(key);
        let entry = state
            .values
            .entry(key.to_string())
            .or_insert_with(|| StatValue::List(Vec::new()));
        match entry {
            StatValue::List(items) => items.push(value.into()),
            other => {
                warn!(key, previous = ?other, "replacing scalar stat with a list");
                *other = StatValue::List(vec![value.into()]);
            }
        }
    }

    /// Increment the counter at `key`, returning the new value.
    pub fn inc_stat(&self, key: &str) -> u64 {
        let mut state = self.lock();
        state.touch(key);
        let next = match state.values.get(key) {
            Some(StatValue::Count(n)) => n + 1,
            _ => 1,
        };
        state.values.insert(key.to_string(), StatValue::Count(next));
        next
    }

    /// Overwrite the value at `key`.
    pub fn set_stat(&self, key: &str, value: impl Into<StatValue>) {
        let mut state = self.lock();
        state.touch(key);
        state.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<StatValue> {
        self.lock().values.get(key).cloned()
    }

    /// Counter value or list length at `key` (0 when absent).
    pub fn count(&self, key: &str) -> u64 {
        self.lock().values.get(key).map(StatValue::magnitude).unwrap_or(0)
    }

    pub fn should_ignore(&self, path: &str) -> bool {
        self.rules.should_ignore(path)
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.rules.should_skip(path)
    }

    /// Record the final category of one invocation and return the stats key
    /// it was filed under.
    ///
    /// Inputs matching an ignore rule go to the ignore buckets instead of
    /// their category.
    pub fn record_outcome(&self, input: &str, category: &ResultCategory) -> String {
        let key = if self.should_ignore(input) {
            if category.is_success() {
                IGNORE_SUCCESS.to_string()
            } else {
                IGNORE_FAIL.to_string()
            }
        } else {
            format!("{}{}", OUTPUT_PREFIX, category)
        };
        self.add_stat(&key, input);
        key
    }

    /// Stamp `start_time` with the current time.
    pub fn mark_start(&self) {
        self.set_stat(START_TIME, Utc::now().to_rfc3339());
    }

    /// Stamp `end_time` with the current time.
    pub fn mark_end(&self) {
        self.set_stat(END_TIME, Utc::now().to_rfc3339());
    }

    /// Failures that are neither ignored, successful nor timeouts.
    pub fn fail_count(&self) -> u64 {
        RunTotals::from_snapshot(&self.snapshot()).failures()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.lock();
        let mut order: Vec<(&String, u64)> = state
            .values
            .keys()
            .map(|k| (k, state.first_seen.get(k).copied().unwrap_or(u64::MAX)))
            .collect();
        order.sort_by_key(|(_, seq)| *seq);
        StatsSnapshot {
            values: state.values.clone(),
            order: order.into_iter().map(|(k, _)| k.clone()).collect(),
        }
    }

    /// Serialize to pretty JSON with sorted keys.
    pub fn to_json(&self) -> Result<String, StatsError> {
        let state = self.lock();
        Ok(serde_json::to_string_pretty(&state.values)?)
    }

    /// Rebuild stats from JSON produced by `to_json`.
    ///
    /// Keys are re-inserted in sorted order, which becomes their tie-break
    /// order in failure rankings.
    pub fn from_json(json: &str, rules: Arc<RuleSet>) -> Result<Self, StatsError> {
        let values: BTreeMap<String, StatValue> = serde_json::from_str(json)?;
        let stats = Stats::new(rules);
        {
            let mut state = stats.lock();
            for key in values.keys() {
                state.touch(key);
            }
            state.values = values;
        }
        Ok(stats)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), StatsError> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StatsError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, json.as_bytes()).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn load_json(path: &Path, rules: Arc<RuleSet>) -> Result<Self, StatsError> {
        let json = fs::read_to_string(path).map_err(|source| StatsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json, rules)
    }
}
