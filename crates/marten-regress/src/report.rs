//! Outcome types and run-summary aggregation.

use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Why a case was skipped instead of executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The case's category is disabled by configuration
    CategoryDisabled,
    /// The category is enabled but a required auxiliary path is unset/invalid
    Misconfigured,
    /// The run was cancelled before this case was dispatched
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::CategoryDisabled => write!(f, "category disabled"),
            SkipReason::Misconfigured => write!(f, "misconfigured"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Harness-fault classification for `Outcome::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The tool process could not be started
    Spawn,
    /// The tool ran past its allotted time and was terminated
    Timeout,
    /// The tool was terminated by run-level cancellation
    Cancelled,
    /// The harness itself faulted while executing the case
    Harness,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Spawn => write!(f, "spawn"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Harness => write!(f, "harness"),
        }
    }
}

/// Outcome of one test case — a closed set.
///
/// `Error` is a harness fault (tool missing, timeout, crash); `Fail` means
/// the tool ran to completion but its result did not match the expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Outcome {
    Pass,
    Fail { detail: String },
    Error {
        #[serde(rename = "error-kind")]
        kind: ErrorKind,
        detail: String,
    },
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    /// Short status label for terminal output
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pass => "PASS",
            Outcome::Fail { .. } => "FAIL",
            Outcome::Error { .. } => "ERROR",
            Outcome::Skipped { .. } => "SKIP",
        }
    }
}

/// Result of executing (or skipping) a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Case identity (relative path from the tests root)
    pub path: String,
    /// Outcome
    pub outcome: Outcome,
    /// Wall-clock execution time
    pub duration_ms: u64,
    /// Captured combined output excerpt (only kept on fail/error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ExecutionResult {
    /// A result for a case that never executed
    pub fn skipped(path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            path: path.into(),
            outcome: Outcome::Skipped { reason },
            duration_ms: 0,
            output: None,
        }
    }
}

/// Aggregated results of one harness run.
///
/// Results arrive in nondeterministic completion order; `finalize` sorts them
/// by case identity so reports are reproducible regardless of worker count.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one result
    pub fn record(&mut self, result: ExecutionResult) {
        self.total += 1;
        match result.outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail { .. } => self.failed += 1,
            Outcome::Error { .. } => self.errors += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
        self.results.push(result);
    }

    /// Sort results by case identity for deterministic reporting
    pub fn finalize(&mut self) {
        self.results.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Overall success: no failures and no errors.
    ///
    /// With `strict`, skipped cases also count against success.
    pub fn success(&self, strict: bool) -> bool {
        self.failed == 0 && self.errors == 0 && (!strict || self.skipped == 0)
    }

    /// Print a human-readable report to stdout: every case with its
    /// outcome, then the count summary, then failure details.
    pub fn print(&self, verbose: bool) {
        println!("\n{}", "=== Regression Test Results ===".bold());
        for result in &self.results {
            let label = match &result.outcome {
                Outcome::Pass => result.outcome.label().green(),
                Outcome::Fail { .. } | Outcome::Error { .. } => result.outcome.label().red(),
                Outcome::Skipped { .. } => result.outcome.label().yellow(),
            };
            let suffix = match &result.outcome {
                Outcome::Pass => String::new(),
                Outcome::Fail { detail } => format!(" - {detail}"),
                Outcome::Error { kind, detail } => format!(" - {kind}: {detail}"),
                Outcome::Skipped { reason } => format!(" ({reason})"),
            };
            println!(
                "  [{label:5}] {} ({}ms){suffix}",
                result.path, result.duration_ms
            );
            if verbose {
                if let Some(ref output) = result.output {
                    for line in output.lines() {
                        println!("      {line}");
                    }
                }
            }
        }

        println!();
        println!("Total:   {}", self.total);
        println!("Passed:  {}", self.passed.to_string().green());
        println!("Failed:  {}", self.failed.to_string().red());
        println!("Errors:  {}", self.errors.to_string().red());
        println!("Skipped: {}", self.skipped.to_string().yellow());
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
