//! TOML configuration and the resolved, immutable `RunConfig`.
//!
//! Layering: built-in defaults ← config file ← CLI overrides. The resolved
//! `RunConfig` is built once per run, shared read-only by all workers, and
//! never mutated afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::discovery::Category;
use crate::error::{HarnessError, Result};

/// Logging sink options (`[logging]` table)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub file_extension: String,
    /// Entry format: "full" or "compact"
    pub format: String,
    pub mirror_to_stderr: bool,
    pub stderr_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("logs"),
            file_extension: "log".to_string(),
            format: "full".to_string(),
            mirror_to_stderr: false,
            stderr_prefix: String::new(),
        }
    }
}

/// Runner options (`[runner]` table)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub toolchain_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub tests_dir: Option<PathBuf>,
    pub test_file_name: String,
    /// Worker count; 0 means autodetect
    pub jobs: usize,
    /// Relative path prefixes pruned from discovery
    pub excluded_dirs: Vec<String>,
    /// Default per-case timeout
    pub timeout_secs: u64,
    pub skip_c_compilation_tests: bool,
    pub idaplugin: IdaPluginConfig,
    pub r2plugin: R2PluginConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            toolchain_dir: None,
            install_dir: None,
            tests_dir: None,
            test_file_name: "test.toml".to_string(),
            jobs: 0,
            excluded_dirs: Vec::new(),
            timeout_secs: 120,
            skip_c_compilation_tests: false,
            idaplugin: IdaPluginConfig::default(),
            r2plugin: R2PluginConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdaPluginConfig {
    pub enabled: bool,
    pub ida_dir: Option<PathBuf>,
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct R2PluginConfig {
    pub enabled: bool,
    pub script: Option<PathBuf>,
}

/// On-disk configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub logging: LoggingConfig,
    pub runner: RunnerConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarnessError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from the given path, or from `regress.toml` if present,
    /// falling back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new("regress.toml");
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// CLI-level overrides layered on top of the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub tests_dir: Option<PathBuf>,
    pub toolchain_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// Gate requirements for one category: an enable flag plus the auxiliary
/// paths that must be set and present for its cases to run.
#[derive(Debug, Clone, Default)]
pub struct CategoryGate {
    pub enabled: bool,
    /// Label → configured path (None when unset)
    pub required_paths: Vec<(String, Option<PathBuf>)>,
}

/// Resolved, immutable configuration for one harness run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub toolchain_dir: Option<PathBuf>,
    pub tests_dir: PathBuf,
    pub test_file_name: String,
    /// Worker count, resolved to >= 1 at construction
    pub jobs: usize,
    pub excluded_dirs: Vec<PathBuf>,
    pub timeout: Duration,
    pub logging: LoggingConfig,
    gates: BTreeMap<Category, CategoryGate>,
}

impl RunConfig {
    /// Resolve file + overrides into a run configuration.
    ///
    /// Worker autodetection happens here, once; it is never re-evaluated
    /// during the run. A configured toolchain dir that does not exist is a
    /// startup fault.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Result<Self> {
        let runner = file.runner;

        let tests_dir = overrides
            .tests_dir
            .or(runner.tests_dir)
            .ok_or(HarnessError::MissingTestsDir)?;

        // install_dir is the broader fallback: its bin/ holds the tools
        let toolchain_dir = overrides
            .toolchain_dir
            .or(runner.toolchain_dir)
            .or(runner.install_dir.map(|dir| dir.join("bin")));
        if let Some(ref dir) = toolchain_dir {
            if !dir.is_dir() {
                return Err(HarnessError::ToolchainDir(dir.clone()));
            }
        }

        let jobs = match overrides.jobs.unwrap_or(runner.jobs) {
            0 => num_cpus::get().max(1),
            n => n,
        };

        let timeout_secs = overrides.timeout_secs.unwrap_or(runner.timeout_secs);

        // Uniform category table: the evaluator never branches per category.
        // Plain is always enabled; the skip-C flag is that category's
        // disable switch; plugin categories carry their required paths.
        let mut gates = BTreeMap::new();
        gates.insert(Category::Plain, CategoryGate {
            enabled: true,
            required_paths: Vec::new(),
        });
        gates.insert(Category::CCompilation, CategoryGate {
            enabled: !runner.skip_c_compilation_tests,
            required_paths: Vec::new(),
        });
        gates.insert(Category::IdaPlugin, CategoryGate {
            enabled: runner.idaplugin.enabled,
            required_paths: vec![
                ("ida_dir".to_string(), runner.idaplugin.ida_dir),
                ("script".to_string(), runner.idaplugin.script),
            ],
        });
        gates.insert(Category::R2Plugin, CategoryGate {
            enabled: runner.r2plugin.enabled,
            required_paths: vec![("script".to_string(), runner.r2plugin.script)],
        });

        Ok(Self {
            toolchain_dir,
            tests_dir,
            test_file_name: runner.test_file_name,
            jobs,
            excluded_dirs: runner.excluded_dirs.iter().map(PathBuf::from).collect(),
            timeout: Duration::from_secs(timeout_secs),
            logging: file.logging,
            gates,
        })
    }

    /// Gate table entry for a category. Unknown categories are treated as
    /// enabled with no requirements.
    pub fn category_gate(&self, category: Category) -> CategoryGate {
        self.gates.get(&category).cloned().unwrap_or(CategoryGate {
            enabled: true,
            required_paths: Vec::new(),
        })
    }
}
