//! Test case discovery.
//!
//! Walks the tests root; any directory containing the configured
//! test-definition file is a test case. Excluded prefixes prune whole
//! subtrees before descent, so nothing under them is ever visited.
//! Discovery records each case's category but applies no gating policy.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::RunConfig;
use crate::error::{HarnessError, Result};

/// Classification of a test case, determining which gate applies
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[default]
    Plain,
    CCompilation,
    IdaPlugin,
    R2Plugin,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Plain => write!(f, "plain"),
            Category::CCompilation => write!(f, "c-compilation"),
            Category::IdaPlugin => write!(f, "ida-plugin"),
            Category::R2Plugin => write!(f, "r2-plugin"),
        }
    }
}

/// One discovered unit of regression testing. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Identity: relative path from the tests root, `/`-separated
    pub path: String,
    /// Category from the definition file (`plain` when unreadable/absent)
    pub category: Category,
    /// Absolute directory of the case
    pub dir: std::path::PathBuf,
    /// Absolute path of the test-definition file
    pub def_file: std::path::PathBuf,
}

/// Lenient peek at the definition's category only.
///
/// A definition that does not parse at all still yields a discoverable case
/// (default category); the executor surfaces the parse error per case.
#[derive(Debug, Default, Deserialize)]
struct CategoryPeek {
    #[serde(default)]
    category: Category,
}

fn peek_category(def_file: &Path) -> Category {
    std::fs::read_to_string(def_file)
        .ok()
        .and_then(|content| toml::from_str::<CategoryPeek>(&content).ok())
        .map(|peek| peek.category)
        .unwrap_or_default()
}

/// Relative identity with `/` separators regardless of platform
fn relative_id(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn is_excluded(rel: &Path, excluded: &[std::path::PathBuf]) -> bool {
    excluded.iter().any(|prefix| rel.starts_with(prefix))
}

/// Discover all test cases under the configured tests root.
///
/// `filter` narrows the result to cases whose identity contains the given
/// substring. Fails if the tests root does not exist — no tests found is a
/// startup fault, not an empty run.
pub fn discover(config: &RunConfig, filter: Option<&str>) -> Result<Vec<TestCase>> {
    let root = &config.tests_dir;
    if !root.is_dir() {
        return Err(HarnessError::TestsRoot(root.clone()));
    }

    let mut cases = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(|rel| !is_excluded(rel, &config.excluded_dirs))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let def_file = entry.path().join(&config.test_file_name);
        if !def_file.is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = relative_id(rel);
        if let Some(pattern) = filter {
            if !path.contains(pattern) {
                continue;
            }
        }

        cases.push(TestCase {
            path,
            category: peek_category(&def_file),
            dir: entry.path().to_path_buf(),
            def_file,
        });
    }

    cases.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(count = cases.len(), "discovered test cases");
    Ok(cases)
}
