//! Plain-text run summaries.

use chrono::{DateTime, Duration};
use std::io::{self, Write};

use super::{
    Stats, StatsSnapshot, END_TIME, IGNORE_FAIL, IGNORE_SUCCESS, OUTPUT_PREFIX, PROGRAM_RUNS,
    START_TIME,
};

const SUCCESS_KEY: &str = "output.success";
const TIMEOUT_KEY: &str = "output.timeout";

/// Examples listed per category in verbose failure reports.
const VERBOSE_EXAMPLES: usize = 3;

/// Headline numbers derived from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub program_runs: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub ignored: u64,
}

impl RunTotals {
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        Self {
            program_runs: snapshot.magnitude(PROGRAM_RUNS),
            successes: snapshot.magnitude(SUCCESS_KEY),
            timeouts: snapshot.magnitude(TIMEOUT_KEY),
            ignored: snapshot.magnitude(IGNORE_SUCCESS) + snapshot.magnitude(IGNORE_FAIL),
        }
    }

    /// Runs that count toward the success percentage.
    pub fn scored_runs(&self) -> u64 {
        self.program_runs.saturating_sub(self.ignored)
    }

    /// `program_runs - ignored - (successes + timeouts)`.
    pub fn failures(&self) -> u64 {
        self.scored_runs()
            .saturating_sub(self.successes + self.timeouts)
    }

    /// Success percentage over scored runs, `None` when nothing was scored.
    pub fn success_percent(&self) -> Option<f64> {
        match self.scored_runs() {
            0 => None,
            scored => Some(100.0 * self.successes as f64 / scored as f64),
        }
    }
}

/// Render a duration as `H:MM:SS.ffffff`, e.g. `0:01:02.500000`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_micros = elapsed.num_microseconds().unwrap_or(i64::MAX).max(0);
    let micros = total_micros % 1_000_000;
    let total_secs = total_micros / 1_000_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{} day{}, ", days, if days == 1 { "" } else { "s" }));
    }
    out.push_str(&format!("{}:{:02}:{:02}", hours, minutes, secs));
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

fn elapsed(snapshot: &StatsSnapshot) -> Option<Duration> {
    let start = DateTime::parse_from_rfc3339(snapshot.text(START_TIME)?).ok()?;
    let end = DateTime::parse_from_rfc3339(snapshot.text(END_TIME)?).ok()?;
    Some(end - start)
}

/// Failure categories ranked by occurrence, ties in first-insertion order.
fn ranked_failures(snapshot: &StatsSnapshot) -> Vec<(&str, &super::StatValue)> {
    let mut ranked: Vec<(&str, &super::StatValue)> = snapshot
        .order
        .iter()
        .filter(|k| {
            k.starts_with(OUTPUT_PREFIX)
                && k.as_str() != SUCCESS_KEY
                && k.as_str() != IGNORE_SUCCESS
                && k.as_str() != IGNORE_FAIL
        })
        .filter_map(|k| snapshot.values.get(k).map(|v| (k.as_str(), v)))
        .collect();
    ranked.sort_by(|a, b| b.1.magnitude().cmp(&a.1.magnitude()));
    ranked
}

impl Stats {
    /// Write elapsed time, throughput and success metrics.
    pub fn write_stats(&self, out: &mut dyn Write) -> io::Result<()> {
        let snapshot = self.snapshot();
        let totals = RunTotals::from_snapshot(&snapshot);

        if let Some(took) = elapsed(&snapshot) {
            writeln!(out, "Run took {}", format_elapsed(took))?;
            let secs = took.num_milliseconds() as f64 / 1000.0;
            if snapshot.get(PROGRAM_RUNS).is_some() && secs > 0.0 {
                writeln!(
                    out,
                    "Speed of {:.2} runs/sec",
                    totals.program_runs as f64 / secs
                )?;
            }
        }

        if let Some(percent) = totals.success_percent() {
            writeln!(
                out,
                "Success Metrics: [{}/{}]",
                totals.successes,
                totals.scored_runs()
            )?;
            writeln!(out, "Success Percentage: [{:.2}%]", percent)?;
        }

        if totals.program_runs != 0 {
            writeln!(
                out,
                "Failures: [{}] Timeouts: [{}] Ignored: [{}]",
                totals.failures(),
                totals.timeouts,
                totals.ignored
            )?;
        }

        out.flush()
    }

    /// Write the `max` most frequent failure categories.
    pub fn write_fails(&self, out: &mut dyn Write, max: usize, verbose: bool) -> io::Result<()> {
        let snapshot = self.snapshot();
        for (key, value) in ranked_failures(&snapshot).into_iter().take(max) {
            let name = key.strip_prefix(OUTPUT_PREFIX).unwrap_or(key);
            writeln!(out, "`{}`: `{}` failures", name, value.magnitude())?;
            if verbose {
                if let super::StatValue::List(items) = value {
                    for item in items.iter().take(VERBOSE_EXAMPLES) {
                        writeln!(out, "    {}", item)?;
                    }
                    if items.len() > VERBOSE_EXAMPLES {
                        writeln!(out, "    ... and {} more", items.len() - VERBOSE_EXAMPLES)?;
                    }
                }
            }
        }
        out.flush()
    }

    /// `write_stats` into a string.
    pub fn stats_text(&self) -> String {
        let mut buf = Vec::new();
        // Writing to a Vec cannot fail.
        let _ = self.write_stats(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// `write_fails` into a string.
    pub fn fails_text(&self, max: usize, verbose: bool) -> String {
        let mut buf = Vec::new();
        let _ = self.write_fails(&mut buf, max, verbose);
        String::from_utf8_lossy(&buf).into_owned()
    }
}
