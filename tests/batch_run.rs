//! End-to-end batch runs against a fake decompiler.

#![cfg(unix)]

mod fixtures;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use toolrun::executor::{BatchOptions, BatchReport, Executor};
use toolrun::invocation::RunOptions;
use toolrun::stats::{
    IGNORE_FAIL, IGNORE_SUCCESS, PROGRAM_RUNS, PROGRAM_TIMEOUTS, SKIPPED_INPUTS,
};
use toolrun::tools::{check_tool, Rellic, ToolCommand};
use toolrun::{RuleSet, Stats};

struct Harness {
    root: TempDir,
    tool: Rellic,
}

impl Harness {
    fn new(files: &[(&str, &str)]) -> Self {
        let root = TempDir::new().unwrap();
        fixtures::corpus(&root.path().join("corpus"), files);
        let script = fixtures::fake_rellic(root.path());
        Self {
            tool: Rellic::new(vec![script.display().to_string()]),
            root,
        }
    }

    fn results(&self) -> std::path::PathBuf {
        self.root.path().join("results")
    }

    fn run(&self, rules: RuleSet, only_fails: bool) -> BatchReport {
        let options = BatchOptions {
            input_dir: self.root.path().join("corpus"),
            output_dir: self.results(),
            jobs: 4,
            only_fails,
            progress: false,
            run: RunOptions {
                limit_memory: false,
                kill_grace: Duration::from_millis(200),
            },
        };
        let stats = Arc::new(Stats::new(Arc::new(rules)));
        Executor::new(&self.tool, stats, options)
            .run()
            .expect("batch should complete")
    }
}

fn quick_rules() -> RuleSet {
    RuleSet {
        timeout_seconds: 2,
        ..RuleSet::default()
    }
}

fn archived(results: &Path, category: &str, rel: &str) -> bool {
    results.join(category).join(rel).join("repro.sh").is_file()
}

#[test]
fn test_every_outcome_gets_one_category() {
    let h = Harness::new(&[
        ("ok.bc", "ok"),
        ("empty.bc", "empty"),
        ("crash/segv.bc", "segv"),
        ("crash/fatal.bc", "fatal"),
        ("crash/abort.bc", "abort"),
        ("asan.bc", "asan"),
        ("assert.bc", "assert"),
        ("exit3.bc", "exit3"),
        ("slow/hang.bc", "hang"),
        ("notes.txt", "ok"),
    ]);
    let report = h.run(quick_rules(), false);
    let stats = &report.stats;

    assert_eq!(report.dispatched, 9);
    assert_eq!(stats.count(PROGRAM_RUNS), 9);
    assert_eq!(stats.count(PROGRAM_TIMEOUTS), 1);

    for key in [
        "output.success",
        "output.zero-sized-output",
        "output.sigsegv",
        "output.ASTBuilder.cpp:311",
        "output.sigabrt",
        "output.foo.c:42",
        "output.assertion-failure",
        "output.unknown-3",
        "output.timeout",
    ] {
        assert_eq!(stats.count(key), 1, "expected one entry under {key}");
    }

    // runs - ignored - (successes + timeouts)
    assert_eq!(stats.fail_count(), 7);

    let results = h.results();
    assert!(archived(&results, "success", "ok.bc"));
    assert!(results.join("success/ok.bc/output.c").is_file());
    assert!(archived(&results, "sigsegv", "crash/segv.bc"));
    assert!(archived(&results, "foo.c:42", "asan.bc"));
    assert!(archived(&results, "timeout", "slow/hang.bc"));
    assert!(!results.join("sigsegv/crash/segv.bc/output.c").exists());

    let stderr = fs::read_to_string(results.join("zero-sized-output/empty.bc/stderr")).unwrap();
    assert!(stderr.ends_with("Zero sized output"));

    assert_eq!(fixtures::entries(&results.join("work")), 0);
    assert!(report.stats_path.is_file());
}

#[test]
fn test_ignored_failure_not_counted() {
    let h = Harness::new(&[
        ("ok.bc", "ok"),
        ("known/bad.bc", "segv"),
        ("known/fine.bc", "ok"),
        ("new.bc", "assert"),
    ]);
    let rules = RuleSet {
        ignore: BTreeSet::from(["known/".to_string()]),
        ..quick_rules()
    };
    let report = h.run(rules, false);
    let stats = &report.stats;

    assert_eq!(stats.count(PROGRAM_RUNS), 4);
    assert_eq!(stats.count(IGNORE_FAIL), 1);
    assert_eq!(stats.count(IGNORE_SUCCESS), 1);
    assert_eq!(stats.count("output.sigsegv"), 0);
    assert_eq!(stats.fail_count(), 1);

    let text = stats.stats_text();
    assert!(text.contains("Success Metrics: [1/2]"), "{text}");
    assert!(text.contains("Ignored: [2]"), "{text}");

    // Archived under the real category even though recording was bucketed.
    assert!(archived(&h.results(), "sigsegv", "known/bad.bc"));
}

#[test]
fn test_skipped_inputs_never_run() {
    let h = Harness::new(&[("ok.bc", "ok"), ("slow/hang.bc", "hang")]);
    let rules = RuleSet {
        skip: BTreeSet::from(["slow".to_string()]),
        ..quick_rules()
    };
    let report = h.run(rules, false);

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.stats.count(PROGRAM_RUNS), 1);
    assert_eq!(report.stats.count(PROGRAM_TIMEOUTS), 0);
    assert_eq!(report.stats.count(SKIPPED_INPUTS), 1);
    assert!(!h.results().join("timeout").exists());
}

#[test]
fn test_only_fails_still_records_successes() {
    let h = Harness::new(&[("a.bc", "ok"), ("b.bc", "ok"), ("c.bc", "segv")]);
    let report = h.run(quick_rules(), true);

    assert_eq!(report.stats.count("output.success"), 2);
    assert!(!h.results().join("success").exists());
    assert!(archived(&h.results(), "sigsegv", "c.bc"));
}

#[test]
fn test_empty_corpus() {
    let h = Harness::new(&[("readme.txt", "nothing to run")]);
    let report = h.run(quick_rules(), false);

    assert_eq!(report.dispatched, 0);
    assert_eq!(report.stats.count(PROGRAM_RUNS), 0);
    assert!(!h.results().join("work").exists());
    assert!(report.stats_path.is_file());
    // No runs: no percentage line.
    assert!(!report.stats.stats_text().contains("Percentage"));
}

#[test]
fn test_stats_file_reloads_identically() {
    let h = Harness::new(&[("a.bc", "ok"), ("b.bc", "asan"), ("c.bc", "segv")]);
    let report = h.run(quick_rules(), false);

    let loaded = Stats::load_json(&report.stats_path, Arc::new(RuleSet::default())).unwrap();
    assert_eq!(loaded.to_json().unwrap(), report.stats.to_json().unwrap());
    assert_eq!(loaded.fail_count(), report.stats.fail_count());
}

#[test]
fn test_version_probe() {
    let h = Harness::new(&[]);
    let version = check_tool(&h.tool).unwrap();
    assert_eq!(version.as_deref(), Some("rellic-decomp version 11.0 (fake)"));
    assert_eq!(h.tool.name(), "rellic");
}
