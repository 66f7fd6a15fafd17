//! toolrun - batch harness for binary-analysis tools
//!
//! Runs a decompiler, lifter or recompiler over every input in a corpus,
//! each under a timeout and optional memory ceiling, buckets the outcomes
//! into failure categories and aggregates run-wide statistics.

pub mod config;
pub mod executor;
pub mod invocation;
pub mod logging;
pub mod notify;
pub mod rules;
pub mod stats;
pub mod tools;

pub use config::{HarnessConfig, ResolvedConfig};
pub use executor::{BatchOptions, BatchReport, Executor};
pub use invocation::{Invocation, RunOptions};
pub use rules::RuleSet;
pub use stats::Stats;
pub use tools::{ToolCommand, ToolKind};
pub use toolrun_classifier::{Classifier, RawOutcome, ResultCategory};
