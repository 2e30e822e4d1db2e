//! Refine/retry orchestration of work plans.
//!
//! [`Orchestrator::run`] executes each [`WorkStep`](patchwork_core::WorkStep)
//! through an explicit [`StepState`] machine: generate a candidate, compile
//! and validate it, apply it, run the repository's commands, score it, and
//! either accept or feed the findings into another attempt. Steps run in a
//! bounded [`StepPool`]; a [`ConflictSchedule`] keeps steps that touch the
//! same files apart.
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

/// Plan execution entry point.
pub mod orchestrator;
/// Bounded step pool.
pub mod pool;
/// Shared per-run resources.
pub mod resources;
/// Per-step state machine driver.
pub mod runner;
/// Conflict-aware scheduling.
pub mod scheduler;
/// Step states.
pub mod state;

pub use orchestrator::Orchestrator;
pub use pool::{PoolOutcome, StepPool};
pub use resources::RunResources;
pub use runner::{StepRun, StepRunner};
pub use scheduler::ConflictSchedule;
pub use state::StepState;
