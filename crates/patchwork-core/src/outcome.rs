//! Step outcomes and the aggregated run result.

use crate::diagnostics::Diagnostics;
use crate::diff::Diff;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a step was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// Strict gate: a verification command failed
    VerificationFailed(String),
    /// Strict gate: the judge rejected the patch
    JudgeRejected(String),
    /// No attempts left
    RetryBudgetExhausted,
    /// Hunks were rejected; the tree needs manual recovery
    ApplyRejected(String),
    /// A verification command could not be launched
    CommandLaunch(String),
    /// Run-level cancellation
    Cancelled,
    /// Context discovery or preparation failed
    Infrastructure(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerificationFailed(detail) => write!(formatter, "verification failed: {detail}"),
            Self::JudgeRejected(detail) => write!(formatter, "judge rejected: {detail}"),
            Self::RetryBudgetExhausted => formatter.write_str("retry budget exhausted"),
            Self::ApplyRejected(detail) => {
                write!(formatter, "apply rejected (manual recovery needed): {detail}")
            }
            Self::CommandLaunch(detail) => write!(formatter, "command launch failed: {detail}"),
            Self::Cancelled => formatter.write_str("cancelled"),
            Self::Infrastructure(detail) => write!(formatter, "infrastructure failure: {detail}"),
        }
    }
}

/// Terminal state of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Applied and passed the gate
    Accepted,
    /// Stopped without acceptance
    Aborted(AbortReason),
    /// Never started
    Skipped(String),
}

impl StepOutcome {
    /// Whether the step was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Whether the step was aborted.
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => formatter.write_str("accepted"),
            Self::Aborted(reason) => write!(formatter, "aborted ({reason})"),
            Self::Skipped(reason) => write!(formatter, "skipped ({reason})"),
        }
    }
}

/// Record of one step's execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name
    pub name: String,
    /// Terminal state
    pub outcome: StepOutcome,
    /// Generation attempts consumed
    pub attempts: usize,
    /// Offset from run start at which the step began
    pub started_at: Duration,
    /// Offset from run start at which the step finished
    pub finished_at: Duration,
    /// Warnings recorded under the migrate gate
    pub warnings: Vec<String>,
    /// Diagnostics from the last verification pass
    pub last_diagnostics: Vec<Diagnostics>,
    /// Diff left applied in the working tree, if any
    pub applied_diff: Option<Diff>,
}

impl StepReport {
    /// A report for a step that never ran.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>, at: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Skipped(reason.into()),
            attempts: 0,
            started_at: at,
            finished_at: at,
            warnings: Vec::new(),
            last_diagnostics: Vec::new(),
            applied_diff: None,
        }
    }

    /// Whether this step's execution window overlaps `other`'s.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.started_at < other.finished_at && other.started_at < self.finished_at
    }
}

/// Aggregated result of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// True only when every step was accepted
    pub success: bool,
    /// Human-readable run log
    pub logs: Vec<String>,
    /// Per-step reports in plan order
    pub steps: Vec<StepReport>,
}

impl AgentRunResult {
    /// Builds the result from step reports, deriving `success`.
    pub fn from_reports(steps: Vec<StepReport>, logs: Vec<String>) -> Self {
        let success = !steps.is_empty() && steps.iter().all(|step| step.outcome.is_accepted());
        Self {
            success,
            logs,
            steps,
        }
    }

    /// Looks up a step report by name.
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.name == name)
    }
}
