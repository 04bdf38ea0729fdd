//! Category gating.
//!
//! Decides per test case whether it runs or is skipped, and binds the
//! category's auxiliary paths when it runs. The decision is driven entirely
//! by the `RunConfig` category table; adding a plugin category is a data
//! change, not an evaluator change.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::discovery::TestCase;
use crate::report::SkipReason;

/// Auxiliary configuration bound to a runnable case.
///
/// The executor exports these to the tool process as `REGRESS_<LABEL>`
/// environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseBinding {
    pub aux: BTreeMap<String, PathBuf>,
}

/// Gate decision for one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Run(CaseBinding),
    Skip(SkipReason),
}

pub struct GateEvaluator<'a> {
    config: &'a RunConfig,
}

impl<'a> GateEvaluator<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Evaluate one case against its category's gate.
    ///
    /// A disabled category skips silently; an enabled category with a
    /// missing or nonexistent required path skips as misconfigured, which
    /// callers surface as a warning.
    pub fn evaluate(&self, case: &TestCase) -> GateDecision {
        let gate = self.config.category_gate(case.category);
        if !gate.enabled {
            return GateDecision::Skip(SkipReason::CategoryDisabled);
        }

        let mut binding = CaseBinding::default();
        for (label, path) in &gate.required_paths {
            match path {
                Some(path) if path.exists() => {
                    binding.aux.insert(label.clone(), path.clone());
                }
                _ => return GateDecision::Skip(SkipReason::Misconfigured),
            }
        }
        GateDecision::Run(binding)
    }
}
