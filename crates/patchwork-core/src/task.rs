//! The unit of work submitted to the pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of change the task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// New functionality
    Feature,
    /// Fix for incorrect behavior
    Bugfix,
    /// Behavior-preserving restructuring
    Refactor,
    /// Investigation without an expected code change
    Research,
}

/// Billing tier the generator may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Local or free models only
    #[default]
    Free,
    /// Paid models allowed
    Paid,
}

/// Requested generation quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Cheapest and fastest model
    Fast,
    /// Middle ground
    Balanced,
    /// Strongest available model
    Best,
    /// Let the generator decide
    #[default]
    Auto,
}

/// Optional limits on the evidence and context handed to the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConstraints {
    /// Maximum number of evidence items (example files) to pass along
    pub max_evidence_items: Option<usize>,
    /// Maximum total size of context text in bytes
    pub max_context_bytes: Option<usize>,
}

/// A single pipeline invocation: what to change, where, and how hard to try.
///
/// Created once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTask {
    /// Root of the target repository
    pub repo: PathBuf,
    /// Natural-language description of the change
    pub description: String,
    /// Kind of change
    pub kind: TaskKind,
    /// Billing tier
    pub tier: Tier,
    /// Generation quality
    pub quality: Quality,
    /// Evidence and context limits
    pub constraints: TaskConstraints,
}

impl AgentTask {
    /// Creates a feature task with default tier, quality and constraints.
    pub fn new(repo: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            description: description.into(),
            kind: TaskKind::Feature,
            tier: Tier::default(),
            quality: Quality::default(),
            constraints: TaskConstraints::default(),
        }
    }

    /// Sets the task kind.
    #[must_use]
    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the billing tier.
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Sets the generation quality.
    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Sets evidence and context limits.
    #[must_use]
    pub fn with_constraints(mut self, constraints: TaskConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Trims example file contents to the task's evidence limits.
    pub fn limit_examples(&self, examples: &[String]) -> Vec<String> {
        let max_items = self.constraints.max_evidence_items.unwrap_or(usize::MAX);
        let mut budget = self.constraints.max_context_bytes.unwrap_or(usize::MAX);
        let mut limited = Vec::new();

        for example in examples.iter().take(max_items) {
            if example.len() > budget {
                break;
            }
            budget -= example.len();
            limited.push(example.clone());
        }

        limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = AgentTask::new("/tmp/repo", "add a health endpoint");
        assert_eq!(task.kind, TaskKind::Feature);
        assert_eq!(task.tier, Tier::Free);
        assert_eq!(task.quality, Quality::Auto);
    }

    #[test]
    fn test_limit_examples_respects_both_limits() {
        let task = AgentTask::new(".", "x").with_constraints(TaskConstraints {
            max_evidence_items: Some(3),
            max_context_bytes: Some(10),
        });
        let examples = vec!["aaaa".to_owned(), "bbbb".to_owned(), "cccc".to_owned()];
        let limited = task.limit_examples(&examples);
        assert_eq!(limited, vec!["aaaa".to_owned(), "bbbb".to_owned()]);
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = match serde_json::to_string(&TaskKind::Bugfix) {
            Ok(json) => json,
            Err(error) => panic!("serialize failed: {error}"),
        };
        assert_eq!(json, "\"bugfix\"");
    }
}
