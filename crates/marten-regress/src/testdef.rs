//! Test-definition files.
//!
//! Each test case directory holds one TOML definition naming the tool to
//! invoke, its arguments, and the expected result:
//!
//! ```toml
//! category = "plain"
//! tool = "decomp"
//! args = ["sample.exe", "--mode", "raw"]
//! timeout_secs = 60
//!
//! [expect]
//! exit_code = 0
//! output_pattern = "^OK\\b"
//! ```
//!
//! At most one of `expect.output`, `expect.output_pattern` and
//! `expect.output_file` may be present; with none, only the exit code is
//! checked.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::discovery::Category;

fn default_tool() -> String {
    "decomp".to_string()
}

/// Faults in a definition itself — harness errors, not test failures
#[derive(Debug, Error)]
pub enum DefError {
    #[error("failed to read test definition: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse test definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("expect: at most one of output, output_pattern, output_file may be set")]
    ConflictingExpectations,

    #[error("expect.output_pattern is not a valid regex: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to read expected output file '{path}': {source}")]
    ExpectedFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed test definition
#[derive(Debug, Clone, Deserialize)]
pub struct TestDef {
    #[serde(default)]
    pub category: Category,

    /// Tool binary name, resolved under the toolchain directory
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Arguments passed to the tool
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-case timeout override
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub expect: Expectation,
}

/// Expected result of the tool invocation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    /// Expected exit code (default 0)
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Exact expected combined output
    #[serde(default)]
    pub output: Option<String>,

    /// Regex the combined output must match
    #[serde(default)]
    pub output_pattern: Option<String>,

    /// File (relative to the case directory) holding the exact expected output
    #[serde(default)]
    pub output_file: Option<String>,

    /// Compiled `output_pattern`, filled at validation
    #[serde(skip)]
    compiled: OnceLock<Regex>,
}

/// Mismatch detail naming the first divergent line
fn mismatch_detail(context: &str, expected: &str, actual: &str) -> String {
    for (n, (exp, act)) in expected.lines().zip(actual.lines()).enumerate() {
        if exp != act {
            return format!("{context}: line {} expected '{exp}', got '{act}'", n + 1);
        }
    }
    let expected_lines = expected.lines().count();
    let actual_lines = actual.lines().count();
    if expected_lines == actual_lines {
        format!("{context}: line endings differ")
    } else {
        format!("{context}: expected {expected_lines} line(s), got {actual_lines}")
    }
}

impl TestDef {
    /// Load and validate a definition file
    pub fn load(path: &Path) -> Result<Self, DefError> {
        let content = std::fs::read_to_string(path)?;
        let def: TestDef = toml::from_str(&content)?;
        def.expect.validate()?;
        Ok(def)
    }
}

impl Expectation {
    fn validate(&self) -> Result<(), DefError> {
        let forms = [
            self.output.is_some(),
            self.output_pattern.is_some(),
            self.output_file.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if forms > 1 {
            return Err(DefError::ConflictingExpectations);
        }
        self.compiled_pattern()?;
        Ok(())
    }

    /// Pattern regex, compiled once and reused by every `check`
    fn compiled_pattern(&self) -> Result<Option<&Regex>, DefError> {
        let Some(ref pattern) = self.output_pattern else {
            return Ok(None);
        };
        if self.compiled.get().is_none() {
            let _ = self.compiled.set(Regex::new(pattern)?);
        }
        Ok(self.compiled.get())
    }

    /// Compare the actual result against the expectation.
    ///
    /// Returns `Ok(None)` on match and `Ok(Some(detail))` on mismatch.
    /// `Err` means the comparison itself could not be carried out.
    pub fn check(
        &self,
        case_dir: &Path,
        output: &str,
        exit_code: Option<i32>,
    ) -> Result<Option<String>, DefError> {
        let expected_code = self.exit_code.unwrap_or(0);
        match exit_code {
            None => {
                return Ok(Some("tool terminated by signal".to_string()));
            }
            Some(code) if code != expected_code => {
                return Ok(Some(format!(
                    "exit code mismatch: expected {expected_code}, got {code}"
                )));
            }
            Some(_) => {}
        }

        if let Some(ref expected) = self.output {
            if output != expected {
                return Ok(Some(mismatch_detail("output mismatch", expected, output)));
            }
        } else if let Some(re) = self.compiled_pattern()? {
            if !re.is_match(output) {
                return Ok(Some(format!(
                    "output does not match pattern '{}'",
                    re.as_str()
                )));
            }
        } else if let Some(ref file) = self.output_file {
            let expected =
                std::fs::read_to_string(case_dir.join(file)).map_err(|e| DefError::ExpectedFile {
                    path: file.clone(),
                    source: e,
                })?;
            if output != expected {
                return Ok(Some(mismatch_detail(
                    &format!("output mismatch against '{file}'"),
                    &expected,
                    output,
                )));
            }
        }

        Ok(None)
    }
}
