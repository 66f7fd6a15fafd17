//! Batch executor: discovery, worker pool, per-input pipeline.
//!
//! Each input goes through run → classify → record → archive → cleanup on a
//! worker thread. Completion order across inputs is unspecified; the only
//! shared mutable state is [`Stats`].

mod discover;

pub use discover::{discover_inputs, Discovery};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use toolrun_classifier::{Classifier, ResultCategory};
use tracing::{debug, info, warn};

use crate::invocation::{Invocation, RunOptions, WORK_DIR};
use crate::stats::{Stats, StatsError, ARCHIVE_ERRORS, SKIPPED_INPUTS};
use crate::tools::ToolCommand;

/// File name of the stats snapshot written into the output dir.
pub const STATS_FILE: &str = "stats.json";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("input directory not found: {0}")]
    InputDirMissing(String),

    #[error("failed to walk {path}: {message}")]
    Walk { path: String, message: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Stats(#[from] StatsError),
}

/// Batch-wide settings.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub jobs: usize,
    /// Archive only non-success results. Successes are still recorded.
    pub only_fails: bool,
    pub progress: bool,
    pub run: RunOptions,
}

/// What a finished batch hands back to the caller.
#[derive(Debug)]
pub struct BatchReport {
    pub stats: Arc<Stats>,
    pub dispatched: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    pub stats_path: PathBuf,
}

pub struct Executor<'a> {
    tool: &'a dyn ToolCommand,
    classifier: Classifier,
    stats: Arc<Stats>,
    options: BatchOptions,
}

impl<'a> Executor<'a> {
    pub fn new(tool: &'a dyn ToolCommand, stats: Arc<Stats>, options: BatchOptions) -> Self {
        Self {
            tool,
            classifier: Classifier::default(),
            stats,
            options,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Run every discovered input and persist `stats.json`.
    pub fn run(&self) -> Result<BatchReport, ExecutorError> {
        let started = Instant::now();
        let opts = &self.options;

        let discovery = discover_inputs(
            &opts.input_dir,
            self.tool.input_extension(),
            self.stats.rules(),
        )?;
        create_dir(&opts.output_dir)?;
        if !discovery.inputs.is_empty() {
            create_dir(&opts.output_dir.join(WORK_DIR))?;
        }
        self.stats
            .set_stat(SKIPPED_INPUTS, discovery.skipped.len() as u64);

        info!(
            tool = self.tool.name(),
            inputs = discovery.inputs.len(),
            skipped = discovery.skipped.len(),
            jobs = opts.jobs,
            "starting batch"
        );

        let progress = self.progress_bar(discovery.inputs.len());
        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.jobs.max(1))
            .thread_name(|i| format!("toolrun-worker-{}", i))
            .build()
            .map_err(|e| ExecutorError::Pool(e.to_string()))?;

        self.stats.mark_start();
        pool.install(|| {
            discovery
                .inputs
                .par_iter()
                .enumerate()
                .for_each(|(index, input)| {
                    if let Some(category) = self.process_one(index, input) {
                        progress.set_message(category.to_string());
                    }
                    progress.inc(1);
                });
        });
        self.stats.mark_end();
        progress.finish_and_clear();

        let stats_path = opts.output_dir.join(STATS_FILE);
        self.stats.save_json(&stats_path)?;
        info!(path = %stats_path.display(), "saved stats");

        Ok(BatchReport {
            stats: Arc::clone(&self.stats),
            dispatched: discovery.inputs.len(),
            skipped: discovery.skipped.len(),
            elapsed: started.elapsed(),
            stats_path,
        })
    }

    /// Full pipeline for one input. Returns `None` only when the invocation
    /// could not be run at all.
    fn process_one(&self, index: usize, input: &Path) -> Option<ResultCategory> {
        let opts = &self.options;
        let mut invocation = Invocation::new(self.tool, input, index, &opts.output_dir);

        let outcome = match invocation.run(&self.stats, &opts.run) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(input = %input.display(), error = %e, "invocation failed");
                return None;
            }
        };

        let category = self.classifier.categorize(&outcome, invocation.stderr());
        let key = self
            .stats
            .record_outcome(&input.display().to_string(), &category);
        debug!(input = %input.display(), %category, %key, "classified");

        if !(opts.only_fails && category.is_success()) {
            if let Err(e) = invocation.archive(&category, &opts.input_dir) {
                warn!(input = %input.display(), error = %e, "failed to archive result");
                self.stats.inc_stat(ARCHIVE_ERRORS);
            }
        }

        invocation.finish();
        Some(category)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.progress || !std::io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }
}

fn create_dir(path: &Path) -> Result<(), ExecutorError> {
    fs::create_dir_all(path).map_err(|source| ExecutorError::Io {
        path: path.display().to_string(),
        source,
    })
}
