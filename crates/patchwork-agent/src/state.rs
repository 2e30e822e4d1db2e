//! Per-step state machine states.

use core::fmt;
use patchwork_core::AbortReason;

/// Where a step is in its generate-verify loop.
///
/// `Accepted` and `Aborted` are terminal. `Refining` loops back to
/// `Generating` while attempts remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    /// Loading what the step needs
    Planning,
    /// Waiting on the generator
    Generating,
    /// Compiling and dry-running the candidate
    Validating,
    /// Writing the diff to the working tree or sandbox
    Applying,
    /// Running repository commands
    Verifying,
    /// Scoring against the pattern contract
    Judging,
    /// Preparing feedback for another attempt
    Refining,
    /// Done; the change stands
    Accepted,
    /// Done; the change was not accepted
    Aborted(AbortReason),
}

impl StepState {
    /// Whether no further transition happens.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Aborted(_))
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Judging => "judging",
            Self::Refining => "refining",
            Self::Accepted => "accepted",
            Self::Aborted(_) => "aborted",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted(reason) => write!(formatter, "aborted ({reason})"),
            other => formatter.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(StepState::Accepted.is_terminal());
        assert!(StepState::Aborted(AbortReason::Cancelled).is_terminal());
        assert!(!StepState::Refining.is_terminal());
        assert_eq!(
            StepState::Aborted(AbortReason::RetryBudgetExhausted).to_string(),
            "aborted (retry budget exhausted)"
        );
        assert_eq!(StepState::Verifying.to_string(), "verifying");
    }
}
