//! Harness configuration.
//!
//! Three layers, lowest precedence first:
//! 1. Built-in defaults (applied by [`HarnessConfig::resolve`])
//! 2. Optional TOML file (`--config`)
//! 3. CLI flags
//!
//! Every field is optional until resolution so that a layer only overrides
//! what it actually sets.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;

use crate::tools::ToolKind;

/// Default number of failure categories listed in summaries.
pub const DEFAULT_MAX_FAILS: usize = 10;

/// Errors from loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// One configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    pub tool: Option<ToolKind>,
    /// Command used to start the tool; split on whitespace.
    pub program: Option<String>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub only_fails: Option<bool>,
    /// JSON rules file (ignore/skip lists, timeout, memory ceiling).
    pub rules: Option<PathBuf>,
    pub limit_memory: Option<bool>,
    pub run_name: Option<String>,
    pub slack_notify: Option<bool>,
    pub max_fails: Option<usize>,
    pub progress: Option<bool>,
}

/// Fully resolved configuration handed to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub tool: ToolKind,
    pub program: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub jobs: usize,
    pub only_fails: bool,
    pub rules: Option<PathBuf>,
    pub limit_memory: bool,
    pub run_name: String,
    pub slack_notify: bool,
    pub max_fails: usize,
    pub progress: bool,
}

impl HarnessConfig {
    /// Load a layer from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn layer(self, other: HarnessConfig) -> HarnessConfig {
        HarnessConfig {
            tool: other.tool.or(self.tool),
            program: other.program.or(self.program),
            input_dir: other.input_dir.or(self.input_dir),
            output_dir: other.output_dir.or(self.output_dir),
            jobs: other.jobs.or(self.jobs),
            only_fails: other.only_fails.or(self.only_fails),
            rules: other.rules.or(self.rules),
            limit_memory: other.limit_memory.or(self.limit_memory),
            run_name: other.run_name.or(self.run_name),
            slack_notify: other.slack_notify.or(self.slack_notify),
            max_fails: other.max_fails.or(self.max_fails),
            progress: other.progress.or(self.progress),
        }
    }

    /// Fill in built-in defaults and check required settings.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let tool = self.tool.ok_or(ConfigError::Missing("tool"))?;
        let input_dir = self.input_dir.ok_or(ConfigError::Missing("input_dir"))?;
        let output_dir = self.output_dir.ok_or(ConfigError::Missing("output_dir"))?;

        let jobs = match self.jobs {
            Some(0) => {
                return Err(ConfigError::Validation(
                    "jobs must be at least 1".to_string(),
                ))
            }
            Some(n) => n,
            None => default_jobs(),
        };

        let program = self
            .program
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| tool.default_program().to_string());

        Ok(ResolvedConfig {
            tool,
            program,
            input_dir,
            output_dir,
            jobs,
            only_fails: self.only_fails.unwrap_or(false),
            rules: self.rules,
            limit_memory: self.limit_memory.unwrap_or(false),
            run_name: self
                .run_name
                .unwrap_or_else(|| format!("{} Batch Run", tool.display_name())),
            slack_notify: self.slack_notify.unwrap_or(false),
            max_fails: self.max_fails.unwrap_or(DEFAULT_MAX_FAILS),
            progress: self.progress.unwrap_or(true),
        })
    }
}

/// Worker count when none is configured: one per available CPU.
pub fn default_jobs() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
