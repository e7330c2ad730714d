//! Result collection and reporting.
//!
//! The runner feeds finished tests to a [`TestReporter`] as they complete and builds a [`SuiteSummary`] that keeps
//! records in discovery order. [`ConsoleReporter`] prints the human-readable report; [`JsonReport`] is the
//! machine-readable one written by `--report`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use mualit_core::Verdict;
use serde::Serialize;

use super::verifier::Failure;

/// Outcome of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    /// Position in discovery order.
    pub index: usize,
    pub id: String,
    pub verdict: Verdict,
    pub duration: Duration,
    pub failure: Option<Failure>,
}

/// Aggregated results of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteSummary {
    pub suite: String,
    /// Number of tests selected to run.
    pub total: usize,
    pub counts: BTreeMap<Verdict, usize>,
    /// One record per finished test, in discovery order.
    pub records: Vec<TestRecord>,
    pub duration: Duration,
}

impl SuiteSummary {
    pub fn new(suite: impl Into<String>, total: usize) -> Self {
        Self {
            suite: suite.into(),
            total,
            counts: BTreeMap::new(),
            records: Vec::with_capacity(total),
            duration: Duration::ZERO,
        }
    }

    /// Add a finished test, keeping records sorted by discovery index.
    pub fn record(&mut self, record: TestRecord) {
        *self.counts.entry(record.verdict).or_default() += 1;
        let at = self.records.partition_point(|r| r.index < record.index);
        self.records.insert(at, record);
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.counts.get(&verdict).copied().unwrap_or(0)
    }

    pub fn completed(&self) -> usize {
        self.records.len()
    }

    /// True when every test ran and ended PASS or XFAIL.
    pub fn all_succeeded(&self) -> bool {
        self.records.len() == self.total && self.records.iter().all(|r| r.verdict.is_success())
    }

    /// Records whose verdict is not a success, in discovery order.
    pub fn failures(&self) -> impl Iterator<Item = &TestRecord> {
        self.records.iter().filter(|r| !r.verdict.is_success())
    }
}

/// Receives progress while the suite runs. All calls come from the single collector task.
pub trait TestReporter: Send {
    fn on_collection_complete(&mut self, suite: &str, total: usize);
    /// `completed` counts finished tests including this one.
    fn on_test_complete(&mut self, record: &TestRecord, completed: usize, total: usize);
    fn on_run_complete(&mut self, summary: &SuiteSummary);
}

/// Discards everything; useful when only the summary matters.
#[derive(Debug, Default)]
pub struct NullReporter;

impl TestReporter for NullReporter {
    fn on_collection_complete(&mut self, _suite: &str, _total: usize) {}
    fn on_test_complete(&mut self, _record: &TestRecord, _completed: usize, _total: usize) {}
    fn on_run_complete(&mut self, _summary: &SuiteSummary) {}
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Line-per-test console report.
pub struct ConsoleReporter<W: Write + Send> {
    out: W,
    suite: String,
    color: bool,
    /// Print details for passing tests that carry a failure too (XFAIL).
    verbose: bool,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W, color: bool, verbose: bool) -> Self {
        Self {
            out,
            suite: String::new(),
            color,
            verbose,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, verdict: Verdict, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        let color = match verdict {
            Verdict::Pass => GREEN,
            Verdict::Xfail | Verdict::UnresolvedTool => YELLOW,
            _ => RED,
        };
        format!("{color}{text}{RESET}")
    }

    fn write_test(&mut self, record: &TestRecord, completed: usize, total: usize) -> io::Result<()> {
        let label = self.paint(record.verdict, record.verdict.as_str());
        writeln!(self.out, "{label}: {} :: {} ({completed} of {total})", self.suite, record.id)?;
        let show_details = !record.verdict.is_success() || self.verbose;
        if let (true, Some(failure)) = (show_details, &record.failure) {
            write_failure_block(&mut self.out, &self.suite, record, failure)?;
        }
        Ok(())
    }

    fn write_summary(&mut self, summary: &SuiteSummary) -> io::Result<()> {
        let failing: Vec<&TestRecord> = summary.failures().collect();
        if !failing.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "Failed Tests ({}):", failing.len())?;
            for record in failing {
                writeln!(self.out, "  {} :: {} ({})", summary.suite, record.id, record.verdict)?;
            }
        }
        let not_run = summary.total.saturating_sub(summary.completed());
        let mut parts: Vec<String> = Vec::new();
        for verdict in Verdict::ALL {
            let count = summary.count(verdict);
            if count > 0 {
                parts.push(self.paint(verdict, &format!("{count} {}", summary_label(verdict))));
            }
        }
        if not_run > 0 {
            parts.push(format!("{not_run} not run"));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }
        writeln!(self.out)?;
        writeln!(
            self.out,
            "====== {} in {:.2}s ======",
            parts.join(", "),
            summary.duration.as_secs_f64()
        )?;
        self.out.flush()
    }
}

impl<W: Write + Send> TestReporter for ConsoleReporter<W> {
    fn on_collection_complete(&mut self, suite: &str, total: usize) {
        self.suite = suite.to_string();
        tracing::info!("running {total} tests in suite `{suite}`");
    }

    fn on_test_complete(&mut self, record: &TestRecord, completed: usize, total: usize) {
        if let Err(err) = self.write_test(record, completed, total) {
            tracing::warn!("cannot write report: {err}");
        }
    }

    fn on_run_complete(&mut self, summary: &SuiteSummary) {
        if let Err(err) = self.write_summary(summary) {
            tracing::warn!("cannot write report: {err}");
        }
    }
}

fn summary_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "passed",
        Verdict::Fail => "failed",
        Verdict::Xfail => "xfailed",
        Verdict::Xpass => "xpassed",
        Verdict::UnresolvedTool => "unresolved",
        Verdict::Timeout => "timed out",
        Verdict::Error => "errors",
    }
}

fn write_failure_block(out: &mut impl Write, suite: &str, record: &TestRecord, failure: &Failure) -> io::Result<()> {
    let banner = "*".repeat(20);
    writeln!(out, "{banner} TEST '{suite} :: {}' {} {banner}", record.id, record.verdict)?;
    for command in failure.command().into_iter().flat_map(str::lines) {
        writeln!(out, "command: {command}")?;
    }
    writeln!(out, "error: {failure}")?;
    if let Some(excerpt) = failure.excerpt() {
        writeln!(out, "{}", excerpt.trim_end())?;
    }
    writeln!(out, "{banner}")
}

/// Machine-readable report, one entry per test in discovery order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonReport {
    pub suite: String,
    pub total: usize,
    pub duration_secs: f64,
    pub counts: BTreeMap<&'static str, usize>,
    pub tests: Vec<JsonRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRecord {
    pub id: String,
    pub verdict: &'static str,
    pub duration_secs: f64,
    /// First failing directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<JsonDirective>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonDirective {
    pub kind: &'static str,
    pub index: usize,
    pub line: Option<usize>,
}

impl JsonReport {
    pub fn from_summary(summary: &SuiteSummary) -> Self {
        let tests = summary
            .records
            .iter()
            .map(|record| {
                let failure = record.failure.as_ref();
                JsonRecord {
                    id: record.id.clone(),
                    verdict: record.verdict.as_str(),
                    duration_secs: record.duration.as_secs_f64(),
                    directive: failure.and_then(|f| {
                        f.directive().map(|(kind, index)| JsonDirective {
                            kind,
                            index,
                            line: f.line(),
                        })
                    }),
                    command: failure.and_then(|f| f.command().map(str::to_string)),
                    message: failure.map(ToString::to_string),
                    excerpt: failure.and_then(Failure::excerpt),
                }
            })
            .collect();
        Self {
            suite: summary.suite.clone(),
            total: summary.total,
            duration_secs: summary.duration.as_secs_f64(),
            counts: summary.counts.iter().map(|(verdict, count)| (verdict.as_str(), *count)).collect(),
            tests,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = self.to_json().map_err(io::Error::other)?;
        fs::write(path, json + "\n")
    }
}

#[cfg(test)]
mod tests {
    use mualit_syntax::Stream;

    use super::*;

    fn record(index: usize, id: &str, verdict: Verdict, failure: Option<Failure>) -> TestRecord {
        TestRecord {
            index,
            id: id.to_string(),
            verdict,
            duration: Duration::from_millis(250),
            failure,
        }
    }

    fn mismatch() -> Failure {
        Failure::PatternMismatch {
            expect: 1,
            line: 3,
            marker: "CHECK".to_string(),
            pattern: "ret i32 0".to_string(),
            stream: Stream::Stdout,
            offset: 12,
            context: "ret i32 1\n}".to_string(),
            command: "/opt/mua/bin/muac --emit=llvm add.mua\ncat add.mua.tmp".to_string(),
            stdout_tail: "ret i32 1\n}".to_string(),
            stderr_tail: "warning: unused value".to_string(),
        }
    }

    fn summary() -> SuiteSummary {
        let mut summary = SuiteSummary::new("mua", 3);
        summary.record(record(2, "parse/ok.mua", Verdict::Pass, None));
        summary.record(record(0, "codegen/add.mua", Verdict::Fail, Some(mismatch())));
        summary.record(record(1, "codegen/sub.mua", Verdict::Pass, None));
        summary.duration = Duration::from_millis(1500);
        summary
    }

    #[test]
    fn test_summary_keeps_discovery_order() {
        let summary = summary();
        let ids: Vec<&str> = summary.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["codegen/add.mua", "codegen/sub.mua", "parse/ok.mua"]);
        assert_eq!(summary.count(Verdict::Pass), 2);
        assert_eq!(summary.count(Verdict::Fail), 1);
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn test_all_succeeded_requires_every_test() {
        let mut summary = SuiteSummary::new("mua", 2);
        summary.record(record(0, "a.mua", Verdict::Pass, None));
        assert!(!summary.all_succeeded());
        summary.record(record(1, "b.mua", Verdict::Xfail, Some(mismatch())));
        assert!(summary.all_succeeded());
    }

    #[test]
    fn test_console_report() {
        let summary = summary();
        let mut reporter = ConsoleReporter::new(Vec::new(), false, false);
        reporter.on_collection_complete("mua", 3);
        for (n, rec) in summary.records.iter().enumerate() {
            reporter.on_test_complete(rec, n + 1, 3);
        }
        reporter.on_run_complete(&summary);
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        insta::assert_snapshot!(text, @r"
        FAIL: mua :: codegen/add.mua (1 of 3)
        ******************** TEST 'mua :: codegen/add.mua' FAIL ********************
        command: /opt/mua/bin/muac --emit=llvm add.mua
        command: cat add.mua.tmp
        error: CHECK #1 (line 3) `CHECK: ret i32 0` not found in stdout at or after offset 12
        context:
        ret i32 1
        }
        stdout:
        ret i32 1
        }
        stderr:
        warning: unused value
        ********************
        PASS: mua :: codegen/sub.mua (2 of 3)
        PASS: mua :: parse/ok.mua (3 of 3)

        Failed Tests (1):
          mua :: codegen/add.mua (FAIL)

        ====== 2 passed, 1 failed in 1.50s ======
        ");
    }

    #[test]
    fn test_console_colors_verdicts() {
        let mut reporter = ConsoleReporter::new(Vec::new(), true, false);
        reporter.on_collection_complete("mua", 1);
        reporter.on_test_complete(&record(0, "a.mua", Verdict::Pass, None), 1, 1);
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(text, "\x1b[32mPASS\x1b[0m: mua :: a.mua (1 of 1)\n");
    }

    #[test]
    fn test_summary_counts_tests_not_run() {
        let mut summary = SuiteSummary::new("mua", 4);
        summary.record(record(0, "a.mua", Verdict::Error, None));
        let mut reporter = ConsoleReporter::new(Vec::new(), false, false);
        reporter.on_run_complete(&summary);
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.ends_with("====== 1 errors, 3 not run in 0.00s ======\n"), "{text}");
    }

    #[test]
    fn test_json_report() {
        let json = JsonReport::from_summary(&summary()).to_json().unwrap();
        insta::assert_snapshot!(json, @r#"
        {
          "suite": "mua",
          "total": 3,
          "duration_secs": 1.5,
          "counts": {
            "FAIL": 1,
            "PASS": 2
          },
          "tests": [
            {
              "id": "codegen/add.mua",
              "verdict": "FAIL",
              "duration_secs": 0.25,
              "directive": {
                "kind": "check",
                "index": 1,
                "line": 3
              },
              "command": "/opt/mua/bin/muac --emit=llvm add.mua\ncat add.mua.tmp",
              "message": "CHECK #1 (line 3) `CHECK: ret i32 0` not found in stdout at or after offset 12",
              "excerpt": "context:\nret i32 1\n}\nstdout:\nret i32 1\n}\nstderr:\nwarning: unused value"
            },
            {
              "id": "codegen/sub.mua",
              "verdict": "PASS",
              "duration_secs": 0.25
            },
            {
              "id": "parse/ok.mua",
              "verdict": "PASS",
              "duration_secs": 0.25
            }
          ]
        }
        "#);
    }

    #[test]
    fn test_json_report_written_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        JsonReport::from_summary(&summary()).write_to(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["tests"][0]["verdict"], "FAIL");
    }
}
