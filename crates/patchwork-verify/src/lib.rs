//! Verification of applied diffs.
//!
//! Runs a repository's own commands through [`RepoCommandAdapter`], stages
//! diffs into throwaway copies with [`TempDirSandbox`], and scores candidates
//! with the [`QualityJudge`].
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        reason = "Test allows"
    )
)]

/// Repository command execution.
pub mod adapter;
/// Pattern-contract conformance checks.
pub mod conformance;
/// Quality scoring.
pub mod judge;
/// Temp-dir sandbox executor.
pub mod sandbox;
/// SWC-based source facts.
pub mod typescan;

pub use adapter::RepoCommandAdapter;
pub use judge::{MAX_SCORE, QualityJudge, Score, Violation, ViolationKind};
pub use sandbox::{TempDirSandbox, TempDirSession};
pub use typescan::{SourceFacts, scan};
