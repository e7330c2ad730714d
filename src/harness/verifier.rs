//! Verifier: turns a test's run results and expectations into a verdict.
//!
//! [`judge`] is a pure function. The same results, expectations and XFAIL marker always give the same
//! [`Judgement`].
//!
//! ## Matching
//!
//! Each stream (stdout, stderr) is the concatenation of that stream across every run, in run order. A run that
//! asked for `2>&1` has both descriptors on one pipe, so its output arrives interleaved in its stdout.
//!
//! Expectations are matched greedy-forward with one cursor per stream. A positive match at `[start, end)` moves the
//! cursor to `end`; nothing is ever searched before the cursor again. `NOT` patterns are held until the next
//! positive match on their stream and must not occur between the cursor and that match's start (or the end of the
//! stream, if none follows).

use std::fmt;

use mualit_core::Verdict;
use mualit_syntax::{CheckKind, ExpectDirective, Stream};

use super::executor::RunResult;

/// Lines of captured output kept in failure excerpts.
pub const TAIL_LINES: usize = 20;
/// Lines of context shown after a mismatch position.
const CONTEXT_LINES: usize = 3;

/// One `RUN:` directive that actually executed, with what it was expected to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Ordinal of the `RUN:` directive.
    pub index: usize,
    pub line: usize,
    /// Shell-quoted expanded command.
    pub command: String,
    pub expect_failure: bool,
    /// stdout was captured rather than redirected to a file.
    pub captures_stdout: bool,
    /// stderr was captured on its own (not redirected and not merged into stdout).
    pub captures_stderr: bool,
    pub result: RunResult,
}

/// Why a test did not pass, in enough detail to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The file has no `RUN:` directive.
    NoRunDirectives,
    /// A directive could not be parsed.
    MalformedDirective { line: usize, message: String, rendered: String },
    /// A `RUN:` command could not be expanded; nothing was spawned.
    Substitution {
        run: usize,
        line: usize,
        message: String,
    },
    /// Reading the test or preparing its scratch space failed.
    Setup { message: String },
    /// The run was cancelled before or while this directive ran.
    Interrupted { run: usize, line: usize, command: String },
    LaunchError {
        run: usize,
        line: usize,
        command: String,
        message: String,
    },
    Timeout {
        run: usize,
        line: usize,
        command: String,
        stdout_tail: String,
        stderr_tail: String,
    },
    /// Exit status did not match the directive's expectation.
    ExecutionFailure {
        run: usize,
        line: usize,
        command: String,
        status: String,
        expected_failure: bool,
        stdout_tail: String,
        stderr_tail: String,
    },
    /// A positive expectation found no match after the cursor.
    PatternMismatch {
        expect: usize,
        line: usize,
        marker: String,
        pattern: String,
        stream: Stream,
        offset: usize,
        context: String,
        /// Commands whose output fed the checked stream, one per line.
        command: String,
        stdout_tail: String,
        stderr_tail: String,
    },
    /// A `NOT` expectation matched.
    NegativeMatch {
        expect: usize,
        line: usize,
        marker: String,
        pattern: String,
        stream: Stream,
        offset: usize,
        context: String,
        command: String,
        stdout_tail: String,
        stderr_tail: String,
    },
}

impl Failure {
    /// Source line of the directive the failure points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Failure::NoRunDirectives | Failure::Setup { .. } => None,
            Failure::MalformedDirective { line, .. }
            | Failure::Substitution { line, .. }
            | Failure::Interrupted { line, .. }
            | Failure::LaunchError { line, .. }
            | Failure::Timeout { line, .. }
            | Failure::ExecutionFailure { line, .. }
            | Failure::PatternMismatch { line, .. }
            | Failure::NegativeMatch { line, .. } => Some(*line),
        }
    }

    /// `("run" | "check", ordinal)` of the failing directive.
    pub fn directive(&self) -> Option<(&'static str, usize)> {
        match self {
            Failure::Substitution { run, .. }
            | Failure::Interrupted { run, .. }
            | Failure::LaunchError { run, .. }
            | Failure::Timeout { run, .. }
            | Failure::ExecutionFailure { run, .. } => Some(("run", *run)),
            Failure::PatternMismatch { expect, .. } | Failure::NegativeMatch { expect, .. } => {
                Some(("check", *expect))
            }
            Failure::NoRunDirectives | Failure::MalformedDirective { .. } | Failure::Setup { .. } => None,
        }
    }

    /// The expanded command involved, if the failure is about one. Check failures list every command whose output
    /// fed the checked stream, one per line.
    pub fn command(&self) -> Option<&str> {
        match self {
            Failure::Interrupted { command, .. }
            | Failure::LaunchError { command, .. }
            | Failure::Timeout { command, .. }
            | Failure::ExecutionFailure { command, .. } => Some(command),
            Failure::PatternMismatch { command, .. } | Failure::NegativeMatch { command, .. } => {
                (!command.is_empty()).then_some(command.as_str())
            }
            _ => None,
        }
    }

    /// Captured-output excerpt for reports.
    pub fn excerpt(&self) -> Option<String> {
        match self {
            Failure::Timeout {
                stdout_tail,
                stderr_tail,
                ..
            }
            | Failure::ExecutionFailure {
                stdout_tail,
                stderr_tail,
                ..
            } => Some(format!("stdout:\n{stdout_tail}\nstderr:\n{stderr_tail}")),
            Failure::PatternMismatch {
                context,
                stdout_tail,
                stderr_tail,
                ..
            }
            | Failure::NegativeMatch {
                context,
                stdout_tail,
                stderr_tail,
                ..
            } => Some(format!(
                "context:\n{context}\nstdout:\n{stdout_tail}\nstderr:\n{stderr_tail}"
            )),
            Failure::MalformedDirective { rendered, .. } => Some(rendered.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::NoRunDirectives => f.write_str("test has no RUN: directive"),
            Failure::MalformedDirective { line, message, .. } => {
                write!(f, "malformed directive on line {line}: {message}")
            }
            Failure::Substitution { run, line, message } => {
                write!(f, "RUN #{run} (line {line}): {message}")
            }
            Failure::Setup { message } => f.write_str(message),
            Failure::Interrupted { run, line, .. } => write!(f, "RUN #{run} (line {line}) was interrupted"),
            Failure::LaunchError { run, line, message, .. } => write!(f, "RUN #{run} (line {line}): {message}"),
            Failure::Timeout { run, line, .. } => write!(f, "RUN #{run} (line {line}) timed out"),
            Failure::ExecutionFailure {
                run,
                line,
                status,
                expected_failure,
                ..
            } => {
                let wanted = if *expected_failure { "a non-zero exit" } else { "exit code 0" };
                write!(f, "RUN #{run} (line {line}) ended with {status}, expected {wanted}")
            }
            Failure::PatternMismatch {
                expect,
                line,
                marker,
                pattern,
                stream,
                offset,
                ..
            } => write!(
                f,
                "CHECK #{expect} (line {line}) `{marker}: {pattern}` not found in {stream} at or after offset {offset}"
            ),
            Failure::NegativeMatch {
                expect,
                line,
                marker,
                pattern,
                stream,
                offset,
                ..
            } => write!(
                f,
                "CHECK #{expect} (line {line}) `{marker}: {pattern}` matched {stream} at offset {offset}"
            ),
        }
    }
}

/// Verdict plus the failure that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// Present for every verdict except PASS and XPASS.
    pub failure: Option<Failure>,
}

impl Judgement {
    pub fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            failure: None,
        }
    }

    pub fn new(verdict: Verdict, failure: Failure) -> Self {
        Self {
            verdict,
            failure: Some(failure),
        }
    }

    /// Apply an `XFAIL:` marker: FAIL becomes XFAIL, PASS becomes XPASS.
    pub fn expecting_failure(self) -> Self {
        Self {
            verdict: self.verdict.expecting_failure(),
            failure: self.failure,
        }
    }
}

/// Judge a test from the commands that ran and the expectations declared in it.
pub fn judge(runs: &[RunOutcome], expect: &[ExpectDirective], xfail: bool) -> Judgement {
    let judgement = judge_runs(runs).unwrap_or_else(|| {
        match match_expectations(&CheckedStreams::collect(runs), expect) {
            Some(failure) => Judgement::new(Verdict::Fail, failure),
            None => Judgement::pass(),
        }
    });
    if xfail { judgement.expecting_failure() } else { judgement }
}

fn judge_runs(runs: &[RunOutcome]) -> Option<Judgement> {
    if runs.is_empty() {
        return Some(Judgement::new(Verdict::Error, Failure::NoRunDirectives));
    }
    for run in runs {
        let result = &run.result;
        if result.interrupted {
            return Some(Judgement::new(
                Verdict::Error,
                Failure::Interrupted {
                    run: run.index,
                    line: run.line,
                    command: run.command.clone(),
                },
            ));
        }
        if let Some(message) = &result.launch_error {
            return Some(Judgement::new(
                Verdict::Error,
                Failure::LaunchError {
                    run: run.index,
                    line: run.line,
                    command: run.command.clone(),
                    message: message.clone(),
                },
            ));
        }
        if result.timed_out {
            return Some(Judgement::new(
                Verdict::Timeout,
                Failure::Timeout {
                    run: run.index,
                    line: run.line,
                    command: run.command.clone(),
                    stdout_tail: tail(&result.stdout),
                    stderr_tail: tail(&result.stderr),
                },
            ));
        }
        if result.exited_zero() == run.expect_failure {
            return Some(Judgement::new(
                Verdict::Fail,
                Failure::ExecutionFailure {
                    run: run.index,
                    line: run.line,
                    command: run.command.clone(),
                    status: result.status_text(),
                    expected_failure: run.expect_failure,
                    stdout_tail: tail(&result.stdout),
                    stderr_tail: tail(&result.stderr),
                },
            ));
        }
    }
    None
}

/// The two searchable streams of a test, with the commands that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedStreams {
    pub stdout: String,
    pub stderr: String,
    /// Commands that fed stdout, in run order.
    pub stdout_commands: Vec<String>,
    /// Commands that fed stderr, in run order.
    pub stderr_commands: Vec<String>,
}

impl CheckedStreams {
    pub fn collect(runs: &[RunOutcome]) -> Self {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut streams = Self::default();
        for run in runs {
            stdout.extend_from_slice(&run.result.stdout);
            stderr.extend_from_slice(&run.result.stderr);
            if run.captures_stdout {
                streams.stdout_commands.push(run.command.clone());
            }
            if run.captures_stderr {
                streams.stderr_commands.push(run.command.clone());
            }
        }
        streams.stdout = String::from_utf8_lossy(&stdout).into_owned();
        streams.stderr = String::from_utf8_lossy(&stderr).into_owned();
        streams
    }

    pub fn get(&self, stream: Stream) -> &str {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    pub fn commands(&self, stream: Stream) -> &[String] {
        match stream {
            Stream::Stdout => &self.stdout_commands,
            Stream::Stderr => &self.stderr_commands,
        }
    }
}

#[derive(Default)]
struct Cursor<'e> {
    pos: usize,
    last: Option<(usize, usize)>,
    pending_not: Vec<&'e ExpectDirective>,
}

/// Match every expectation; the first failure in declaration order wins.
pub fn match_expectations(streams: &CheckedStreams, expect: &[ExpectDirective]) -> Option<Failure> {
    let mut cursors: [Cursor<'_>; 2] = Default::default();

    for directive in expect {
        let text = streams.get(directive.stream);
        let cursor = &mut cursors[directive.stream as usize];

        if directive.kind == CheckKind::Not {
            cursor.pending_not.push(directive);
            continue;
        }

        let found = match directive.kind {
            CheckKind::Empty => {
                let rest = &text[cursor.pos..];
                match rest.find(|c: char| !c.is_whitespace()) {
                    None => Some((text.len(), text.len())),
                    Some(at) => return Some(mismatch(directive, streams, cursor.pos + at)),
                }
            }
            kind => {
                let Some((from, to)) = search_region(kind, text, cursor) else {
                    return Some(mismatch(directive, streams, cursor.pos));
                };
                let Some(matcher) = &directive.matcher else {
                    return Some(mismatch(directive, streams, from));
                };
                match matcher.find(text, from, to) {
                    Some(found) => Some(found),
                    None => return Some(mismatch(directive, streams, from)),
                }
            }
        };

        if let Some((start, end)) = found {
            if let Some(failure) = check_pending_not(cursor, streams, directive.stream, start) {
                return Some(failure);
            }
            cursor.pos = end;
            cursor.last = Some((start, end));
        }
    }

    for (stream, cursor) in [Stream::Stdout, Stream::Stderr].into_iter().zip(cursors.iter_mut()) {
        let end = streams.get(stream).len();
        if let Some(failure) = check_pending_not(cursor, streams, stream, end) {
            return Some(failure);
        }
    }
    None
}

/// Byte range `[from, to)` a positive expectation may match in.
fn search_region(kind: CheckKind, text: &str, cursor: &Cursor<'_>) -> Option<(usize, usize)> {
    let (last_start, last_end) = cursor.last.unwrap_or((cursor.pos, cursor.pos));
    // Line of the previous match: the line holding its last byte.
    let anchor = if last_end > last_start { last_end - 1 } else { last_start };
    let line_end = |from: usize| text[from..].find('\n').map_or(text.len(), |i| from + i);

    match kind {
        CheckKind::Match => Some((cursor.pos, text.len())),
        CheckKind::Same => {
            let end = line_end(anchor.min(text.len()));
            (cursor.pos <= end).then_some((cursor.pos, end))
        }
        CheckKind::Next => {
            let mut start = line_end(anchor.min(text.len())) + 1;
            while start <= text.len() {
                let end = line_end(start);
                if !text[start..end].trim().is_empty() {
                    return Some((start.max(cursor.pos), end));
                }
                start = end + 1;
            }
            None
        }
        CheckKind::Not | CheckKind::Empty => None,
    }
}

fn check_pending_not(
    cursor: &mut Cursor<'_>,
    streams: &CheckedStreams,
    stream: Stream,
    until: usize,
) -> Option<Failure> {
    let text = streams.get(stream);
    let from = cursor.pos;
    for directive in cursor.pending_not.drain(..) {
        let Some(matcher) = &directive.matcher else {
            continue;
        };
        if let Some((start, _)) = matcher.find(text, from, until) {
            return Some(Failure::NegativeMatch {
                expect: directive.index,
                line: directive.line,
                marker: directive.marker.clone(),
                pattern: matcher.pattern().to_string(),
                stream: directive.stream,
                offset: start,
                context: context_at(text, start),
                command: streams.commands(stream).join("\n"),
                stdout_tail: tail(streams.stdout.as_bytes()),
                stderr_tail: tail(streams.stderr.as_bytes()),
            });
        }
    }
    None
}

fn mismatch(directive: &ExpectDirective, streams: &CheckedStreams, offset: usize) -> Failure {
    Failure::PatternMismatch {
        expect: directive.index,
        line: directive.line,
        marker: directive.marker.clone(),
        pattern: directive.matcher.as_ref().map_or_else(String::new, |m| m.pattern().to_string()),
        stream: directive.stream,
        offset,
        context: context_at(streams.get(directive.stream), offset),
        command: streams.commands(directive.stream).join("\n"),
        stdout_tail: tail(streams.stdout.as_bytes()),
        stderr_tail: tail(streams.stderr.as_bytes()),
    }
}

/// A few lines of `text` starting at the line that holds `offset`.
pub fn context_at(text: &str, offset: usize) -> String {
    if text.is_empty() {
        return "<empty>".to_string();
    }
    let offset = offset.min(text.len());
    let start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let mut lines: Vec<&str> = text[start..].lines().take(CONTEXT_LINES).collect();
    if lines.is_empty() {
        lines.push("<end of stream>");
    }
    lines.join("\n")
}

/// Last [`TAIL_LINES`] lines of captured bytes.
pub fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(TAIL_LINES);
    lines[skip..].join("\n")
}
