//! Startup-class errors.
//!
//! Everything here aborts the run before any test is dispatched and maps to
//! the "harness could not start" exit code. Per-case faults never appear in
//! this enum; they are recorded as `Outcome::Error` in the run summary.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent the harness from starting a run
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration file could not be read
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("failed to parse config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The tests root is mandatory
    #[error("runner.tests_dir is required (config file or --tests-dir)")]
    MissingTestsDir,

    /// Tests root missing or unreadable — fatal, not "zero tests ran"
    #[error("tests root '{0}' does not exist or is not a directory")]
    TestsRoot(PathBuf),

    /// Configured toolchain directory does not exist
    #[error("toolchain directory '{0}' does not exist")]
    ToolchainDir(PathBuf),

    /// Walking the tests root failed partway
    #[error("failed to walk tests root: {0}")]
    Walk(#[from] walkdir::Error),

    /// Log sink could not be created
    #[error("failed to open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run task itself died (not any individual case)
    #[error("internal harness failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
