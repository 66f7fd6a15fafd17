//! toolrun CLI
//!
//! Entry point for the `toolrun` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use toolrun::config::{HarnessConfig, ResolvedConfig};
use toolrun::executor::{BatchOptions, Executor};
use toolrun::invocation::RunOptions;
use toolrun::notify::{run_summary, NotificationSink, SlackWebhook};
use toolrun::tools::check_tool;
use toolrun::{Classifier, RawOutcome, RuleSet, Stats, ToolKind};

/// Exit status when results were saved but the notification failed.
const EXIT_NOTIFY_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "toolrun")]
#[command(about = "Run a decompiler or recompiler over a corpus and bucket the failures", version)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool over every input in a directory
    Run(RunArgs),

    /// Categorize a recorded outcome without running anything
    Classify {
        /// Legacy signed status (negative values are signals or sentinels)
        #[arg(
            long,
            allow_negative_numbers = true,
            conflicts_with = "signal",
            required_unless_present = "signal"
        )]
        status: Option<i32>,

        /// Terminating signal number
        #[arg(long)]
        signal: Option<i32>,

        /// File holding the captured stderr
        #[arg(long)]
        stderr: Option<PathBuf>,
    },

    /// Print summaries from a saved stats.json
    Report {
        /// Path to the stats snapshot
        #[arg(long)]
        stats: PathBuf,

        /// Number of failure categories to list
        #[arg(long, default_value_t = toolrun::config::DEFAULT_MAX_FAILS)]
        max_fails: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Which tool to drive
    #[arg(long, value_enum)]
    tool: Option<ToolKind>,

    /// Command used to start the tool (defaults per tool)
    #[arg(long)]
    program: Option<String>,

    /// Directory of inputs, searched recursively
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Where results and stats.json are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Worker threads (default: one per CPU)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Only archive failing results
    #[arg(long)]
    only_fails: bool,

    /// JSON rules file with ignore/skip lists and limits
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Apply the rules' memory ceiling to each run
    #[arg(long)]
    limit_memory: bool,

    /// Name of this run for notifications
    #[arg(long)]
    run_name: Option<String>,

    /// Post a summary to the webhook in SLACK_HOOK
    #[arg(long)]
    slack_notify: bool,

    /// Number of failure categories to report
    #[arg(long)]
    max_fails: Option<usize>,

    /// TOML file with defaults for any of these flags
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl RunArgs {
    /// Flags as a config layer; unset switches stay `None` so a config
    /// file value is not clobbered.
    fn to_layer(&self) -> HarnessConfig {
        HarnessConfig {
            tool: self.tool,
            program: self.program.clone(),
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            jobs: self.jobs,
            only_fails: self.only_fails.then_some(true),
            rules: self.rules.clone(),
            limit_memory: self.limit_memory.then_some(true),
            run_name: self.run_name.clone(),
            slack_notify: self.slack_notify.then_some(true),
            max_fails: self.max_fails,
            progress: self.no_progress.then_some(false),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    toolrun::logging::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_batch(&args, cli.verbose),
        Commands::Classify {
            status,
            signal,
            stderr,
        } => run_classify(status, signal, stderr, cli.verbose),
        Commands::Report { stats, max_fails } => run_report(stats, max_fails, cli.verbose),
    }
}

fn resolve_config(args: &RunArgs) -> Result<ResolvedConfig, String> {
    let file = match &args.config {
        Some(path) => HarnessConfig::load(path).map_err(|e| e.to_string())?,
        None => HarnessConfig::default(),
    };
    file.layer(args.to_layer())
        .resolve()
        .map_err(|e| e.to_string())
}

fn run_batch(args: &RunArgs, verbose: bool) -> ExitCode {
    let config = match resolve_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rules = match &config.rules {
        Some(path) => match RuleSet::load(path) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error loading rules: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => RuleSet::default(),
    };

    // Checked up front so a long run never ends without its report.
    let sink = if config.slack_notify {
        match SlackWebhook::from_env() {
            Ok(s) => Some(s),
            Err(e) => {
                eprintln!("Invalid webhook: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let tool = match config.tool.profile(&config.program) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let version = match check_tool(tool.as_ref()) {
        Ok(v) => v.unwrap_or_else(|| "unknown".to_string()),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(tool = %config.tool, %version, "tool available");

    let stats = Arc::new(Stats::new(Arc::new(rules)));
    let options = BatchOptions {
        input_dir: config.input_dir.clone(),
        output_dir: config.output_dir.clone(),
        jobs: config.jobs,
        only_fails: config.only_fails,
        progress: config.progress,
        run: RunOptions {
            limit_memory: config.limit_memory,
            ..RunOptions::default()
        },
    };

    let report = match Executor::new(tool.as_ref(), stats, options).run() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Batch failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        dispatched = report.dispatched,
        skipped = report.skipped,
        elapsed_secs = report.elapsed.as_secs(),
        "batch finished"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let printed = report
        .stats
        .write_stats(&mut out)
        .and_then(|_| report.stats.write_fails(&mut out, config.max_fails, verbose));
    if let Err(e) = printed {
        warn!(error = %e, "failed to print summary");
    }
    let _ = out.flush();

    if let Some(sink) = sink {
        let message = run_summary(&report.stats, &config.run_name, &version, config.max_fails);
        if let Err(e) = sink.post(&message) {
            error!(error = %e, "failed to post run summary");
            return ExitCode::from(EXIT_NOTIFY_FAILED);
        }
        info!("posted run summary");
    }

    ExitCode::SUCCESS
}

fn run_classify(
    status: Option<i32>,
    signal: Option<i32>,
    stderr_path: Option<PathBuf>,
    verbose: bool,
) -> ExitCode {
    let outcome = match (status, signal) {
        (_, Some(signo)) => RawOutcome::Signaled(signo),
        (Some(code), None) => RawOutcome::from_status_code(code),
        (None, None) => {
            eprintln!("Error: one of --status or --signal is required");
            return ExitCode::FAILURE;
        }
    };

    let stderr = match stderr_path {
        Some(path) => match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => String::new(),
    };

    let classifier = Classifier::default();
    println!("{}", classifier.categorize(&outcome, &stderr));
    if verbose {
        match classifier.explain(&outcome, &stderr) {
            Some(rule) => println!("matched rule: {}", rule),
            None => println!("matched rule: none"),
        }
    }
    ExitCode::SUCCESS
}

fn run_report(path: PathBuf, max_fails: usize, verbose: bool) -> ExitCode {
    let stats = match Stats::load_json(&path, Arc::new(RuleSet::default())) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading stats: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = stats
        .write_stats(&mut out)
        .and_then(|_| stats.write_fails(&mut out, max_fails, verbose));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error writing report: {}", e);
            ExitCode::FAILURE
        }
    }
}
