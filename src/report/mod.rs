//! Result classification
//!
//! The verdict is scraped from the captured error stream, not taken from the
//! process exit status. A unittest-style runner ends its report with a
//! summary starting at `Ran N tests`, and the final word of that summary is
//! `OK` only when everything passed.

use std::fmt;

/// Marks the start of the runner's summary
pub const SENTINEL: &str = "Ran ";

/// Final token of a passing summary
pub const PASS_TOKEN: &str = "OK";

/// Fixed first line of every report body
pub const BODY_PREFIX: &str = "tests output...\n\n";

/// Binary outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Problem,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Problem => write!(f, "PROBLEM"),
        }
    }
}

/// Decide the verdict from error-stream text
///
/// Only the first sentinel counts. Text without a sentinel is always a
/// problem, even if it happens to end in `OK`.
pub fn classify(stderr: &str) -> Verdict {
    let Some(start) = stderr.find(SENTINEL) else {
        return Verdict::Problem;
    };

    match stderr[start..].split_whitespace().next_back() {
        Some(PASS_TOKEN) => Verdict::Passed,
        _ => Verdict::Problem,
    }
}

/// Subject and body ready to be mailed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedReport {
    pub verdict: Verdict,
    pub subject: String,
    pub body: String,
}

impl ClassifiedReport {
    /// Classify `stderr` and build the report for a suite
    ///
    /// The body carries the complete error stream, not just the summary.
    pub fn from_stderr(suite_name: &str, stderr: &str) -> Self {
        let verdict = classify(stderr);
        Self {
            verdict,
            subject: subject_for(suite_name, verdict),
            body: format!("{}{}", BODY_PREFIX, stderr),
        }
    }
}

/// Subject line for a verdict, e.g. `ocra interface-tests passed`
pub fn subject_for(suite_name: &str, verdict: Verdict) -> String {
    format!("{} {}", suite_name, verdict)
}
