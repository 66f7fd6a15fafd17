//! One bounded run of a tool against one input file.
//!
//! Lifecycle: `new` → `run` (exactly once) → optional `archive` → `finish`.
//! The scratch output is removed by `finish`, or on drop if the caller bails
//! out early.

pub mod process;
mod scratch;

pub use process::{run_bounded, CapturedRun, ProcessExit, ProcessLimits, DEFAULT_KILL_GRACE};
pub use scratch::ScratchOutput;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toolrun_classifier::{RawOutcome, ResultCategory};
use tracing::{debug, warn};

use crate::stats::{Stats, PROGRAM_RUNS, PROGRAM_TIMEOUTS};
use crate::tools::{shell_command_line, ArchiveRequest, ToolCommand};

/// Subdirectory of the output dir holding scratch artifacts.
pub const WORK_DIR: &str = "work";

/// Appended to stderr when a clean exit left no usable output.
const ZERO_SIZED_NOTE: &str = "Zero sized output";

/// Errors from invocation bookkeeping.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invocation of {0} already ran")]
    AlreadyRun(String),

    #[error("return code never set for {0}")]
    NotRun(String),

    #[error("failed to archive {input}: {source}")]
    Archive {
        input: String,
        #[source]
        source: io::Error,
    },
}

/// Per-run knobs shared by every invocation of a batch.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Apply the rules' memory ceiling to each child.
    pub limit_memory: bool,
    pub kill_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit_memory: false,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// Captured result of a finished run.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub outcome: RawOutcome,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

pub struct Invocation<'t> {
    tool: &'t dyn ToolCommand,
    input: PathBuf,
    index: usize,
    output_dir: PathBuf,
    scratch: ScratchOutput,
    argv: Vec<String>,
    result: Option<InvocationResult>,
}

impl<'t> Invocation<'t> {
    /// Prepare a run of `tool` on `input`. Nothing is executed yet.
    ///
    /// The scratch artifact is `<output_dir>/work/<index>-<stem>.<ext>`; the
    /// index keeps inputs with equal stems from colliding.
    pub fn new(tool: &'t dyn ToolCommand, input: &Path, index: usize, output_dir: &Path) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let scratch_path = output_dir
            .join(WORK_DIR)
            .join(format!("{}-{}.{}", index, stem, tool.output_extension()));
        let argv = tool.build_command(input, &scratch_path);
        debug!(scratch = %scratch_path.display(), "prepared invocation");

        Self {
            tool,
            input: input.to_path_buf(),
            index,
            output_dir: output_dir.to_path_buf(),
            scratch: ScratchOutput::new(scratch_path),
            argv,
            result: None,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn command_line(&self) -> String {
        shell_command_line(&self.argv)
    }

    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn result(&self) -> Option<&InvocationResult> {
        self.result.as_ref()
    }

    /// Captured stderr, empty before `run`.
    pub fn stderr(&self) -> &str {
        self.result.as_ref().map(|r| r.stderr.as_str()).unwrap_or("")
    }

    /// Execute the tool once under the limits in `stats.rules()`.
    ///
    /// Increments `program_runs` (and `program_timeouts` on timeout) once the
    /// outcome is known.
    pub fn run(&mut self, stats: &Stats, options: &RunOptions) -> Result<RawOutcome, InvocationError> {
        if self.result.is_some() {
            return Err(InvocationError::AlreadyRun(self.input.display().to_string()));
        }

        let rules = stats.rules();
        let limits = ProcessLimits {
            timeout: rules.timeout(),
            memory_limit: options.limit_memory.then_some(rules.memory_limit_bytes),
            kill_grace: options.kill_grace,
        };
        debug!(
            command = %self.command_line(),
            timeout_secs = rules.timeout_seconds,
            "running tool"
        );

        let captured = run_bounded(&self.argv, &limits);
        stats.inc_stat(PROGRAM_RUNS);

        let CapturedRun {
            exit,
            stdout,
            mut stderr,
            duration,
        } = captured;

        let outcome = match exit {
            ProcessExit::SpawnFailed(message) => {
                debug!(error = %message, "tool invocation hit OS error");
                RawOutcome::OsError(message)
            }
            ProcessExit::WaitFailed(message) => {
                warn!(
                    input = %self.input.display(),
                    error = %message,
                    "tool started but its exit status was lost"
                );
                RawOutcome::OsError(message)
            }
            ProcessExit::TimedOut => {
                stats.inc_stat(PROGRAM_TIMEOUTS);
                debug!("tool hit a timeout");
                RawOutcome::Timeout
            }
            ProcessExit::Signaled(signo) => RawOutcome::Signaled(signo),
            ProcessExit::Exited(0) if !self.scratch.is_populated() => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(ZERO_SIZED_NOTE);
                RawOutcome::ZeroSizedOutput
            }
            ProcessExit::Exited(0) => RawOutcome::Success,
            ProcessExit::Exited(code) => RawOutcome::Exited(code),
        };
        debug!(status = outcome.status_code(), ?duration, "tool finished");

        self.result = Some(InvocationResult {
            outcome: outcome.clone(),
            stdout,
            stderr,
            duration,
        });
        Ok(outcome)
    }

    /// Result directory for `category`:
    /// `<output>/<category>/<input relative to source_root>/`.
    pub fn archive_dir(&self, category: &ResultCategory, source_root: &Path) -> PathBuf {
        let relative = self
            .input
            .strip_prefix(source_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                self.input
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(format!("input-{}", self.index)))
            });
        self.output_dir
            .join(category_dir_name(category))
            .join(relative)
    }

    /// Persist the result directory through the tool's archive capability.
    pub fn archive(
        &self,
        category: &ResultCategory,
        source_root: &Path,
    ) -> Result<PathBuf, InvocationError> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| InvocationError::NotRun(self.input.display().to_string()))?;

        let dest_dir = self.archive_dir(category, source_root);
        debug!(dir = %dest_dir.display(), "archiving result");

        let request = ArchiveRequest {
            dest_dir: &dest_dir,
            input: &self.input,
            output: result
                .outcome
                .is_success()
                .then(|| self.scratch.path()),
            stdout: &result.stdout,
            stderr: &result.stderr,
            argv: &self.argv,
        };
        self.tool
            .archive(&request)
            .map_err(|source| InvocationError::Archive {
                input: self.input.display().to_string(),
                source,
            })?;
        Ok(dest_dir)
    }

    /// Remove the scratch artifact and hand back the captured result.
    pub fn finish(mut self) -> Option<InvocationResult> {
        if let Err(e) = self.scratch.remove() {
            warn!(
                path = %self.scratch.path().display(),
                error = %e,
                "failed to remove scratch output"
            );
        }
        self.result.take()
    }
}

/// Directory name for a category. Extracted signatures come from free text,
/// so path separators and parent references are neutralised.
pub fn category_dir_name(category: &ResultCategory) -> String {
    let name = category.to_string().replace(['/', '\\'], "_");
    match name.as_str() {
        "" | "." | ".." => format!("_{}", name),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Profile that runs a shell snippet; `$2` is the scratch output path.
    struct ShellTool {
        program: Vec<String>,
    }

    impl ShellTool {
        fn new(script: &str) -> Self {
            Self {
                program: vec!["/bin/sh".into(), "-c".into(), script.into(), "tool".into()],
            }
        }
    }

    impl ToolCommand for ShellTool {
        fn name(&self) -> &str {
            "shell"
        }
        fn program(&self) -> &[String] {
            &self.program
        }
        fn input_extension(&self) -> Option<&str> {
            Some("in")
        }
        fn output_extension(&self) -> &str {
            "out"
        }
        fn build_command(&self, input: &Path, output: &Path) -> Vec<String> {
            let mut argv = self.program.clone();
            argv.push(input.display().to_string());
            argv.push(output.display().to_string());
            argv
        }
        fn probe(&self) -> crate::tools::ToolProbe {
            crate::tools::ToolProbe {
                argv: self.program.clone(),
                require_success: false,
                reports_version: false,
            }
        }
    }

    struct Fixture {
        dir: TempDir,
        input: PathBuf,
        output_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src/sub");
        fs::create_dir_all(&src).unwrap();
        let input = src.join("case.in");
        fs::write(&input, "payload").unwrap();
        let output_dir = dir.path().join("out");
        fs::create_dir_all(output_dir.join(WORK_DIR)).unwrap();
        Fixture {
            dir,
            input,
            output_dir,
        }
    }

    fn stats_with_timeout(secs: u64) -> Stats {
        let rules = RuleSet {
            timeout_seconds: secs,
            ..RuleSet::default()
        };
        Stats::new(Arc::new(rules))
    }

    #[test]
    fn test_scratch_path_uses_index_and_stem() {
        let fx = fixture();
        let tool = ShellTool::new("true");
        let inv = Invocation::new(&tool, &fx.input, 7, &fx.output_dir);
        assert_eq!(inv.scratch_path(), fx.output_dir.join("work/7-case.out"));
        assert_eq!(inv.argv().last().unwrap(), &fx.output_dir.join("work/7-case.out").display().to_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_success_and_archive() {
        let fx = fixture();
        let tool = ShellTool::new("echo hi; cp \"$1\" \"$2\"");
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 0, &fx.output_dir);

        let outcome = inv.run(&stats, &RunOptions::default()).unwrap();
        assert_eq!(outcome, RawOutcome::Success);
        assert_eq!(stats.count(PROGRAM_RUNS), 1);

        let dir = inv
            .archive(&ResultCategory::Success, &fx.dir.path().join("src"))
            .unwrap();
        assert_eq!(dir, fx.output_dir.join("success/sub/case.in"));
        assert_eq!(fs::read_to_string(dir.join("input.in")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(dir.join("output.out")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(dir.join("stdout")).unwrap(), "hi\n");
        assert!(fs::read_to_string(dir.join("repro.sh")).unwrap().starts_with("#!/bin/sh\n/bin/sh -c"));

        let scratch = inv.scratch_path().to_path_buf();
        assert!(scratch.exists());
        inv.finish();
        assert!(!scratch.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_sized_output() {
        let fx = fixture();
        let tool = ShellTool::new(": > \"$2\"; echo warn >&2");
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 1, &fx.output_dir);
        assert_eq!(
            inv.run(&stats, &RunOptions::default()).unwrap(),
            RawOutcome::ZeroSizedOutput
        );
        assert_eq!(inv.stderr(), "warn\nZero sized output");
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_output() {
        let fx = fixture();
        let tool = ShellTool::new("exit 0");
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 1, &fx.output_dir);
        assert_eq!(
            inv.run(&stats, &RunOptions::default()).unwrap(),
            RawOutcome::ZeroSizedOutput
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_archive_has_no_output() {
        let fx = fixture();
        let tool = ShellTool::new("echo partial > \"$2\"; echo 'Decl.cpp:9' >&2; exit 1");
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 2, &fx.output_dir);
        assert_eq!(inv.run(&stats, &RunOptions::default()).unwrap(), RawOutcome::Exited(1));

        let dir = inv
            .archive(&ResultCategory::AssertionFailure, &fx.dir.path().join("src"))
            .unwrap();
        assert!(!dir.join("output.out").exists());
        assert_eq!(fs::read_to_string(dir.join("stderr")).unwrap(), "Decl.cpp:9\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_counts() {
        let fx = fixture();
        let tool = ShellTool::new("sleep 30");
        let stats = stats_with_timeout(1);
        let options = RunOptions {
            limit_memory: false,
            kill_grace: Duration::from_millis(100),
        };
        let mut inv = Invocation::new(&tool, &fx.input, 3, &fx.output_dir);
        assert_eq!(inv.run(&stats, &options).unwrap(), RawOutcome::Timeout);
        assert_eq!(stats.count(PROGRAM_RUNS), 1);
        assert_eq!(stats.count(PROGRAM_TIMEOUTS), 1);
    }

    #[test]
    fn test_os_error() {
        let fx = fixture();
        let tool = ShellTool {
            program: vec!["/nonexistent/decompiler".into()],
        };
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 4, &fx.output_dir);
        assert!(matches!(
            inv.run(&stats, &RunOptions::default()).unwrap(),
            RawOutcome::OsError(_)
        ));
        assert_eq!(stats.count(PROGRAM_RUNS), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_only_once() {
        let fx = fixture();
        let tool = ShellTool::new("exit 2");
        let stats = stats_with_timeout(10);
        let mut inv = Invocation::new(&tool, &fx.input, 5, &fx.output_dir);
        inv.run(&stats, &RunOptions::default()).unwrap();
        assert!(matches!(
            inv.run(&stats, &RunOptions::default()),
            Err(InvocationError::AlreadyRun(_))
        ));
        assert_eq!(stats.count(PROGRAM_RUNS), 1);
    }

    #[test]
    fn test_archive_before_run_fails() {
        let fx = fixture();
        let tool = ShellTool::new("true");
        let inv = Invocation::new(&tool, &fx.input, 6, &fx.output_dir);
        assert!(matches!(
            inv.archive(&ResultCategory::Success, fx.dir.path()),
            Err(InvocationError::NotRun(_))
        ));
    }

    #[test]
    fn test_input_outside_source_root() {
        let fx = fixture();
        let tool = ShellTool::new("true");
        let inv = Invocation::new(&tool, &fx.input, 6, &fx.output_dir);
        assert_eq!(
            inv.archive_dir(&ResultCategory::Sigsegv, Path::new("/elsewhere")),
            fx.output_dir.join("sigsegv/case.in")
        );
    }

    #[test]
    fn test_category_dir_name() {
        assert_eq!(category_dir_name(&ResultCategory::Located("a/b.c:1".into())), "a_b.c:1");
        assert_eq!(category_dir_name(&ResultCategory::Located("..".into())), "_..");
        assert_eq!(category_dir_name(&ResultCategory::Sigabrt), "sigabrt");
    }
}
