use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::{
    AgentTask, Candidate, CommandKey, Diagnostics, Diff, Feedback, PathStrip, PatternContract,
    Result, WorkStep,
};

/// External producer of candidate changes.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produces the first candidate for a step.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator fails or its output cannot be parsed.
    async fn generate(
        &self,
        task: &AgentTask,
        contract: &PatternContract,
        examples: &[String],
        step: &WorkStep,
    ) -> Result<Candidate>;

    /// Produces a new candidate given feedback from the failed attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator fails or its output cannot be parsed.
    async fn refine(
        &self,
        task: &AgentTask,
        step: &WorkStep,
        feedback: &Feedback,
        previous: Option<&Diff>,
    ) -> Result<Candidate>;
}

/// Conventions and evidence discovered for a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoContext {
    /// Inferred conventions
    pub contract: PatternContract,
    /// Example file contents handed to the generator
    pub examples: Vec<String>,
}

/// Discovers repository context. Invoked once per task.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Builds the context for `repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be inspected.
    async fn discover(&self, repo: &Path) -> Result<RepoContext>;
}

/// Context provider that returns a fixed context.
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    context: RepoContext,
}

impl StaticContextProvider {
    /// Wraps a ready-made context.
    pub fn new(context: RepoContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn discover(&self, _repo: &Path) -> Result<RepoContext> {
        Ok(self.context.clone())
    }
}

/// An isolated copy of a repository with a diff applied.
#[async_trait]
pub trait SandboxSession: Send + Sync {
    /// Root of the isolated copy.
    fn root(&self) -> &Path;

    /// Runs a repository command inside the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be launched or the run is cancelled.
    async fn execute(&self, command: CommandKey, cancel: &CancellationToken)
    -> Result<Diagnostics>;
}

/// Creates isolated copies of a repository for verification.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Copies `repo` and applies `diff` to the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails or the diff does not apply.
    async fn stage(
        &self,
        repo: &Path,
        diff: &Diff,
        strip: PathStrip,
    ) -> Result<Box<dyn SandboxSession>>;

    /// Stages `diff` and runs one command in the copy.
    ///
    /// # Errors
    ///
    /// Returns an error if staging fails, the command cannot be launched,
    /// or the run is cancelled.
    async fn execute(
        &self,
        repo: &Path,
        diff: &Diff,
        command: CommandKey,
        cancel: &CancellationToken,
    ) -> Result<Diagnostics> {
        let session = self.stage(repo, diff, diff.dialect()).await?;
        session.execute(command, cancel).await
    }
}
