//! Tool profiles.
//!
//! Each wrapped tool implements `ToolCommand`: how to build its command line,
//! what it reads and writes, how to probe that it is installed, and how to
//! archive one result. The archive layout is shared by every profile unless
//! a tool overrides `archive`.

mod anvill;
mod clang;
mod rellic;

pub use anvill::Anvill;
pub use clang::Clang;
pub use rellic::Rellic;

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::invocation::process::{run_bounded, ProcessExit, ProcessLimits};

/// Deadline for availability/version probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors checking that a tool can be run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("empty tool command")]
    EmptyCommand,

    #[error("could not find {tool} command: {program}")]
    NotFound { tool: String, program: String },

    #[error("could not probe {tool}: {detail}")]
    ProbeFailed { tool: String, detail: String },
}

/// How to check that a tool is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProbe {
    pub argv: Vec<String>,
    /// A nonzero exit means the tool is unusable.
    pub require_success: bool,
    /// stdout carries a version banner worth reporting.
    pub reports_version: bool,
}

/// Everything an archive needs about one finished invocation.
#[derive(Debug)]
pub struct ArchiveRequest<'a> {
    /// `<output>/<category>/<relative input path>/`
    pub dest_dir: &'a Path,
    pub input: &'a Path,
    /// Produced artifact, present only for successful runs.
    pub output: Option<&'a Path>,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub argv: &'a [String],
}

/// Capability interface for one wrapped tool.
pub trait ToolCommand: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Command prefix, e.g. `["python3", "-m", "anvill"]`.
    fn program(&self) -> &[String];

    /// Extension of corpus inputs; `None` selects executable files.
    fn input_extension(&self) -> Option<&str>;

    /// Extension of the artifact the tool writes.
    fn output_extension(&self) -> &str;

    /// Full argv for one run.
    fn build_command(&self, input: &Path, output: &Path) -> Vec<String>;

    fn probe(&self) -> ToolProbe;

    /// Write the result directory for one invocation.
    fn archive(&self, request: &ArchiveRequest<'_>) -> io::Result<()> {
        write_archive(
            request,
            &archive_name("input", self.input_extension()),
            &archive_name("output", Some(self.output_extension())),
        )
    }
}

fn archive_name(stem: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem.to_string(),
    }
}

/// Standard result directory: input copy, output copy (success only),
/// captured stdout/stderr and a one-line reproduction script.
pub fn write_archive(
    request: &ArchiveRequest<'_>,
    input_name: &str,
    output_name: &str,
) -> io::Result<()> {
    fs::create_dir_all(request.dest_dir)?;

    fs::copy(request.input, request.dest_dir.join(input_name))?;
    if let Some(output) = request.output {
        fs::copy(output, request.dest_dir.join(output_name))?;
    }

    fs::write(request.dest_dir.join("stdout"), request.stdout)?;
    fs::write(request.dest_dir.join("stderr"), request.stderr)?;

    let repro_path = request.dest_dir.join("repro.sh");
    let mut repro = fs::File::create(&repro_path)?;
    writeln!(repro, "#!/bin/sh")?;
    writeln!(repro, "{}", shell_command_line(request.argv))?;
    drop(repro);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&repro_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

/// Join argv into a line `/bin/sh` will split back into the same words.
pub fn shell_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Split a user-supplied program string on whitespace.
pub fn split_program(program: &str) -> Vec<String> {
    program.split_whitespace().map(str::to_string).collect()
}

/// The wrapped tools this harness knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// LLVM bitcode to C decompiler.
    Rellic,
    /// Binary to specification lifter.
    Anvill,
    /// Recompile decompiled C with clang.
    Clang,
}

impl ToolKind {
    pub fn default_program(&self) -> &'static str {
        match self {
            ToolKind::Rellic => "rellic-decomp-11.0",
            ToolKind::Anvill => "python3 -m anvill",
            ToolKind::Clang => "clang",
        }
    }

    /// Title-case name for run headers.
    pub fn display_name(&self) -> &'static str {
        match self {
            ToolKind::Rellic => "Rellic",
            ToolKind::Anvill => "Anvill",
            ToolKind::Clang => "Clang",
        }
    }

    /// Build the profile for `program` (whitespace-separated command prefix).
    pub fn profile(&self, program: &str) -> Result<Box<dyn ToolCommand>, ToolError> {
        let program = split_program(program);
        if program.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        Ok(match self {
            ToolKind::Rellic => Box::new(Rellic::new(program)),
            ToolKind::Anvill => Box::new(Anvill::new(program)),
            ToolKind::Clang => Box::new(Clang::new(program)),
        })
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Rellic => f.write_str("rellic"),
            ToolKind::Anvill => f.write_str("anvill"),
            ToolKind::Clang => f.write_str("clang"),
        }
    }
}

/// Locate an executable the way a shell would: paths containing a separator
/// are checked directly, bare names are searched on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Check that the tool exists and responds to its probe.
///
/// Returns the version banner for tools that report one.
pub fn check_tool(tool: &dyn ToolCommand) -> Result<Option<String>, ToolError> {
    let program = tool.program().first().ok_or(ToolError::EmptyCommand)?;
    if find_executable(program).is_none() {
        return Err(ToolError::NotFound {
            tool: tool.name().to_string(),
            program: tool.program().join(" "),
        });
    }

    let probe = tool.probe();
    let run = run_bounded(&probe.argv, &ProcessLimits::with_timeout(PROBE_TIMEOUT));
    let failed = |detail: String| ToolError::ProbeFailed {
        tool: tool.name().to_string(),
        detail,
    };
    match run.exit {
        ProcessExit::SpawnFailed(e) | ProcessExit::WaitFailed(e) => return Err(failed(e)),
        ProcessExit::TimedOut => return Err(failed("timeout exception".to_string())),
        ProcessExit::Signaled(s) => return Err(failed(format!("killed by signal {}", s))),
        ProcessExit::Exited(code) if code != 0 && probe.require_success => {
            return Err(failed(format!("exited with status {}", code)));
        }
        ProcessExit::Exited(_) => {}
    }

    if probe.reports_version {
        Ok(Some(run.stdout.trim().to_string()))
    } else {
        Ok(None)
    }
}
