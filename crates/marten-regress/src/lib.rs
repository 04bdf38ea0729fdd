//! # Marten regression-test harness
//!
//! Orchestration engine for the Marten decompiler toolchain's regression
//! tests: discovers test cases in a directory tree, gates them by category,
//! executes the external tool invocations across a bounded worker pool, and
//! aggregates the outcomes into a deterministic report.
//!
//! Pipeline: discovery → gate evaluation → scheduling → execution →
//! aggregation. The resolved [`RunConfig`] is built once and shared
//! read-only by every stage.

#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod gate;
pub mod logging;
pub mod parallel;
pub mod report;
pub mod testdef;

use std::sync::Arc;

use indicatif::ProgressBar;

pub use config::{ConfigFile, Overrides, RunConfig};
pub use discovery::{Category, TestCase};
pub use error::{HarnessError, Result};
pub use parallel::CancelToken;
pub use report::{ErrorKind, ExecutionResult, Outcome, RunSummary, SkipReason};

/// Discover and execute all tests for one resolved configuration.
///
/// Fails only for startup-class faults (bad tests root); per-case problems
/// are recorded in the returned summary.
pub fn run(
    config: Arc<RunConfig>,
    filter: Option<String>,
    cancel: CancelToken,
    progress: Option<ProgressBar>,
) -> Result<RunSummary> {
    let cases = discovery::discover(&config, filter.as_deref())?;
    if let Some(ref pb) = progress {
        pb.set_length(cases.len() as u64);
    }
    let executor = exec::ToolExecutor::new(Arc::clone(&config));
    Ok(parallel::run_parallel(
        cases, &config, &executor, &cancel, progress,
    ))
}
