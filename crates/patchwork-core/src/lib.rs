//! Core types and traits for the patch pipeline.
//!
//! This crate holds the data model shared by every stage of the pipeline:
//!
//! - **Task & Plan Model**: [`AgentTask`], [`WorkPlan`] and [`WorkStep`]
//! - **Edit Model**: [`Anchor`], [`EditOp`] and [`PatchOps`]
//! - **Diff Model**: [`Diff`], [`PathStrip`] and [`Candidate`]
//! - **Verification Model**: [`Diagnostics`], [`CommandKey`] and [`GateMode`]
//! - **Run Results**: [`AgentRunResult`], [`StepReport`] and [`StepOutcome`]
//!
//! It also defines the error taxonomy, the pipeline configuration and the
//! traits implemented by external collaborators (generator, context discovery
//! and sandbox execution).

/// Pipeline configuration loaded from TOML.
pub mod config;
/// Pattern contracts describing repository conventions.
pub mod contract;
/// Diagnostics captured from verification commands.
pub mod diagnostics;
/// Unified diff values and candidate changes.
pub mod diff;
/// Anchor-addressed edit operations.
pub mod edit;
/// Error types and result definitions.
pub mod error;
/// Refinement feedback carried between attempts.
pub mod feedback;
/// Gate mode policy.
pub mod gate;
/// Step outcomes and run results.
pub mod outcome;
/// Work plans and steps.
pub mod plan;
/// Agent task definition.
pub mod task;
/// Collaborator traits (generator, context discovery, sandbox).
pub mod traits;

pub use config::{
    ADAPTER_CONFIG_PATH, AdapterConfig, ApplyBackend, JudgeConfig, PipelineConfig, VerifyConfig,
};
pub use contract::{
    CaseStyle, ContainerRule, ImportRule, LayoutRule, MethodStyle, NamingConvention,
    PatternContract, WrapperRule,
};
pub use diagnostics::{CommandKey, Diagnostics, TIMEOUT_EXIT_CODE};
pub use diff::{Candidate, Diff, PathStrip};
pub use edit::{Anchor, AnchorKind, EditOp, PatchOps};
pub use error::{ApplyError, ApplyErrorKind, CompileError, Error, Result};
pub use feedback::Feedback;
pub use gate::{GATE_MODE_ENV, GateMode};
pub use outcome::{AbortReason, AgentRunResult, StepOutcome, StepReport};
pub use plan::{WorkPlan, WorkStep};
pub use task::{AgentTask, Quality, TaskConstraints, TaskKind, Tier};
pub use traits::{
    ContextProvider, Generator, RepoContext, SandboxExecutor, SandboxSession, StaticContextProvider,
};
