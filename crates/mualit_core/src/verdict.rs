//! Final classification of a test case.

use std::fmt;

/// Outcome of one test file after all of its directives ran and were judged.
///
/// ## Notes
/// - Only [`Verdict::Pass`] and [`Verdict::Xfail`] count as success for the suite exit code.
/// - Declaration order is the order used for summary counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verdict {
    /// Every directive behaved and every expectation matched.
    Pass,
    /// A directive exited with the wrong status or an expectation did not match.
    Fail,
    /// The test is marked `XFAIL:` and failed as declared.
    Xfail,
    /// The test is marked `XFAIL:` but passed.
    Xpass,
    /// A directive referenced a tool that could not be resolved.
    UnresolvedTool,
    /// A directive exceeded its wall-clock budget and was killed.
    Timeout,
    /// The harness could not judge the test (malformed directive, unknown placeholder, interrupted run, ...).
    Error,
}

impl Verdict {
    /// Every verdict, in summary order.
    pub const ALL: [Verdict; 7] = [
        Verdict::Pass,
        Verdict::Fail,
        Verdict::Xfail,
        Verdict::Xpass,
        Verdict::UnresolvedTool,
        Verdict::Timeout,
        Verdict::Error,
    ];

    /// Return the upper-case label used in per-test lines and machine-readable reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Xfail => "XFAIL",
            Verdict::Xpass => "XPASS",
            Verdict::UnresolvedTool => "UNRESOLVED_TOOL",
            Verdict::Timeout => "TIMEOUT",
            Verdict::Error => "ERROR",
        }
    }

    /// Parse a label produced by [`Verdict::as_str`].
    pub fn from_label(label: &str) -> Option<Verdict> {
        Verdict::ALL.into_iter().find(|v| v.as_str() == label)
    }

    /// Whether this verdict keeps the suite green.
    pub const fn is_success(self) -> bool {
        matches!(self, Verdict::Pass | Verdict::Xfail)
    }

    /// Apply expected-failure semantics: a failure becomes `Xfail`, a pass becomes `Xpass`.
    ///
    /// Timeouts, errors and unresolved tools are not "failing as declared" and pass through unchanged.
    pub const fn expecting_failure(self) -> Verdict {
        match self {
            Verdict::Pass => Verdict::Xpass,
            Verdict::Fail => Verdict::Xfail,
            other => other,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
