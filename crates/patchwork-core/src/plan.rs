//! Work plans: ordered steps, each scoped to a set of files.

use crate::{Error, Result};
use core::num::NonZeroUsize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

/// Default number of steps that may run at once.
const DEFAULT_PARALLELISM: NonZeroUsize = match NonZeroUsize::new(2) {
    Some(parallelism) => parallelism,
    None => NonZeroUsize::MIN,
};

fn default_parallelism() -> NonZeroUsize {
    DEFAULT_PARALLELISM
}

/// One unit of change inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStep {
    /// Unique name within the plan
    pub name: String,
    /// What the step should accomplish
    pub description: String,
    /// Files the step may touch, relative to the repository root
    #[serde(default)]
    pub files: BTreeSet<PathBuf>,
    /// Tool hint for the generator
    #[serde(default)]
    pub tool: String,
    /// Free-form parameters, keyed uniquely
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Strings that must appear, in order, in the verification output
    #[serde(default)]
    pub success_signals: Vec<String>,
    /// Optional relative cost estimate
    #[serde(default)]
    pub cost_estimate: Option<f64>,
}

impl WorkStep {
    /// Creates a step with no files, parameters or signals.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            files: BTreeSet::new(),
            tool: String::new(),
            params: BTreeMap::new(),
            success_signals: Vec::new(),
            cost_estimate: None,
        }
    }

    /// Adds a file to the step's scope.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    /// Sets the tool hint.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Inserts a parameter, replacing any previous value for the key.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Appends a success signal.
    #[must_use]
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.success_signals.push(signal.into());
        self
    }

    /// Checks that every success signal occurs in `output`, in declaration order.
    pub fn signals_satisfied(&self, output: &str) -> bool {
        let mut remaining = output;
        for signal in &self.success_signals {
            match remaining.find(signal.as_str()) {
                Some(position) => remaining = &remaining[position + signal.len()..],
                None => return false,
            }
        }
        true
    }
}

/// An ordered set of steps serving one goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPlan {
    /// The overall goal
    pub goal: String,
    /// Repository root the plan targets
    pub repo: PathBuf,
    /// Steps in plan order
    pub steps: Vec<WorkStep>,
    /// Upper bound on concurrently running steps
    #[serde(default = "default_parallelism")]
    pub parallelism: NonZeroUsize,
}

impl WorkPlan {
    /// Creates a plan with default parallelism.
    pub fn new(goal: impl Into<String>, repo: impl Into<PathBuf>, steps: Vec<WorkStep>) -> Self {
        Self {
            goal: goal.into(),
            repo: repo.into(),
            steps,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Sets the parallelism bound.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: NonZeroUsize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Checks structural rules: at least one step and unique step names.
    ///
    /// # Errors
    /// Returns `Error::InvalidPlan` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidPlan("plan has no steps".to_owned()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(Error::InvalidPlan(format!(
                    "duplicate step name `{}`",
                    step.name
                )));
            }
        }

        Ok(())
    }
}
