//! The per-step generate, verify and refine loop.

use crate::resources::RunResources;
use crate::state::StepState;
use patchwork_core::{
    AbortReason, AgentTask, ApplyError, ApplyErrorKind, Candidate, Diagnostics, Diff, Error,
    Feedback, GateMode, Generator, PipelineConfig, SandboxExecutor, SandboxSession, StepOutcome,
    StepReport, WorkStep,
};
use patchwork_edit::{DiffApplier, EditCompiler, FileSnapshot};
use patchwork_verify::{QualityJudge, RepoCommandAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Terminal result of one step, merged into the run result by the caller.
#[derive(Debug, Clone)]
pub struct StepRun {
    /// Report for the run result
    pub report: StepReport,
    /// Log lines produced by the step
    pub logs: Vec<String>,
}

impl StepRun {
    /// Whether the step ended aborted.
    pub const fn is_aborted(&self) -> bool {
        self.report.outcome.is_aborted()
    }
}

/// Mutable state carried between transitions of one step.
#[derive(Default)]
struct StepProgress {
    attempts: usize,
    candidate: Option<Candidate>,
    diff: Option<Diff>,
    pre: FileSnapshot,
    session: Option<Box<dyn SandboxSession>>,
    diagnostics: Vec<Diagnostics>,
    feedback: Feedback,
    warnings: Vec<String>,
    logs: Vec<String>,
    applied: Option<Diff>,
}

impl StepProgress {
    /// Keeps a downgraded failure on the report and in the run log.
    fn record_warning(&mut self, warning: String) {
        self.logs.push(format!("warning: {warning}"));
        self.warnings.push(warning);
    }
}

/// Drives one step through its [`StepState`] machine.
///
/// Cheap to clone; every clone shares the same generator, adapter and
/// run resources.
#[derive(Clone)]
pub struct StepRunner {
    config: Arc<PipelineConfig>,
    gate: GateMode,
    task: Arc<AgentTask>,
    generator: Arc<dyn Generator>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    adapter: Arc<RepoCommandAdapter>,
    applier: DiffApplier,
    judge: QualityJudge,
    resources: Arc<RunResources>,
}

impl StepRunner {
    /// Creates a runner for one pipeline run.
    #[expect(clippy::too_many_arguments, reason = "Every collaborator is shared per run")]
    pub fn new(
        config: Arc<PipelineConfig>,
        gate: GateMode,
        task: Arc<AgentTask>,
        generator: Arc<dyn Generator>,
        sandbox: Option<Arc<dyn SandboxExecutor>>,
        adapter: Arc<RepoCommandAdapter>,
        applier: DiffApplier,
        resources: Arc<RunResources>,
    ) -> Self {
        let judge = QualityJudge::new(config.judge);
        Self {
            config,
            gate,
            task,
            generator,
            sandbox,
            adapter,
            applier,
            judge,
            resources,
        }
    }

    /// Gate mode this runner enforces.
    pub const fn gate(&self) -> GateMode {
        self.gate
    }

    fn repo(&self) -> PathBuf {
        self.resources.repo().to_path_buf()
    }

    /// Runs `step` until it is accepted or aborted.
    pub async fn run(&self, step: &WorkStep) -> StepRun {
        let started_at = self.resources.elapsed();
        let mut progress = StepProgress::default();
        let mut state = StepState::Planning;

        while !state.is_terminal() {
            let next = if self.resources.cancel().is_cancelled() {
                StepState::Aborted(AbortReason::Cancelled)
            } else {
                match state {
                    StepState::Planning => self.plan().await,
                    StepState::Generating => self.generate(step, &mut progress).await,
                    StepState::Validating => self.validate(&mut progress).await,
                    StepState::Applying => self.apply(&mut progress).await,
                    StepState::Verifying => self.verify(step, &mut progress).await,
                    StepState::Judging => self.judge(&mut progress).await,
                    StepState::Refining => self.refine(&mut progress),
                    StepState::Accepted | StepState::Aborted(_) => break,
                }
            };
            info!("Step `{}`: {state} -> {next}", step.name);
            state = next;
        }

        let outcome = match state {
            StepState::Aborted(reason) => StepOutcome::Aborted(reason),
            _ => StepOutcome::Accepted,
        };
        progress
            .logs
            .push(format!("{}: {outcome} after {} attempt(s)", step.name, progress.attempts));
        if let Some(diff) = &progress.applied {
            progress.logs.push(format!(
                "{}: diff left applied to {}",
                step.name,
                diff.touched_paths().join(", ")
            ));
        }

        StepRun {
            report: StepReport {
                name: step.name.clone(),
                outcome,
                attempts: progress.attempts,
                started_at,
                finished_at: self.resources.elapsed(),
                warnings: progress.warnings,
                last_diagnostics: progress.diagnostics,
                applied_diff: progress.applied,
            },
            logs: progress.logs,
        }
    }

    async fn plan(&self) -> StepState {
        match self.resources.context().await {
            Ok(_) => StepState::Generating,
            Err(error) => StepState::Aborted(AbortReason::Infrastructure(error.to_string())),
        }
    }

    async fn generate(&self, step: &WorkStep, progress: &mut StepProgress) -> StepState {
        progress.attempts += 1;
        let context = match self.resources.context().await {
            Ok(context) => context,
            Err(error) => return StepState::Aborted(AbortReason::Infrastructure(error.to_string())),
        };
        let examples = self.task.limit_examples(&context.examples);
        let first = progress.attempts == 1;
        let limit = Duration::from_secs(self.config.generation_timeout_seconds);
        let feedback = &progress.feedback;
        let previous = progress.diff.as_ref();

        let call = async {
            if first {
                self.generator
                    .generate(&self.task, &context.contract, &examples, step)
                    .await
            } else {
                self.generator.refine(&self.task, step, feedback, previous).await
            }
        };
        let result = tokio::select! {
            () = self.resources.cancel().cancelled() => Err(Error::Cancelled),
            outcome = timeout(limit, call) => outcome
                .unwrap_or_else(|_| Err(Error::Timeout(limit.as_millis() as u64))),
        };

        match result {
            Ok(candidate) => {
                progress.candidate = Some(candidate);
                StepState::Validating
            }
            Err(Error::Cancelled) => StepState::Aborted(AbortReason::Cancelled),
            Err(error) if error.is_recoverable() => {
                warn!("Generation for `{}` failed: {error}", step.name);
                progress.feedback.push_issue(format!("generation failed: {error}"));
                StepState::Refining
            }
            Err(error) => StepState::Aborted(AbortReason::Infrastructure(error.to_string())),
        }
    }

    async fn validate(&self, progress: &mut StepProgress) -> StepState {
        let Some(candidate) = progress.candidate.take() else {
            return StepState::Refining;
        };
        let repo = self.repo();

        let diff = match candidate {
            Candidate::Diff(diff) => diff,
            Candidate::Ops(ops) => {
                let snapshot = match FileSnapshot::load(&repo, ops.touched_paths()).await {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        progress.feedback.push_issue(format!("could not read targets: {error}"));
                        return StepState::Refining;
                    }
                };
                match EditCompiler::new(self.config.default_dialect).compile(&ops, &snapshot) {
                    Ok(diff) => diff,
                    Err(error) => {
                        debug!("Compile failed: {error}");
                        progress.feedback.push_issue(format!("edit compile failed: {error}"));
                        return StepState::Refining;
                    }
                }
            }
        };

        if let Err(error) = self.applier.validate(&diff, &repo, diff.dialect()).await {
            progress.feedback.push_issue(format!("diff does not apply: {error}"));
            progress.diff = Some(diff);
            return StepState::Refining;
        }

        match FileSnapshot::load(&repo, diff.touched_paths()).await {
            Ok(pre) => progress.pre = pre,
            Err(error) => {
                progress.feedback.push_issue(format!("could not read targets: {error}"));
                progress.diff = Some(diff);
                return StepState::Refining;
            }
        }
        progress.diff = Some(diff);
        StepState::Applying
    }

    async fn apply(&self, progress: &mut StepProgress) -> StepState {
        let Some(diff) = progress.diff.clone() else {
            return StepState::Refining;
        };
        let repo = self.repo();

        if self.gate.runs_checks()
            && let Some(sandbox) = &self.sandbox
        {
            return match sandbox.stage(&repo, &diff, diff.dialect()).await {
                Ok(session) => {
                    debug!("Staged diff in {}", session.root().display());
                    progress.session = Some(session);
                    StepState::Verifying
                }
                Err(Error::Apply(error)) => Self::apply_failed(progress, &error),
                Err(error) => StepState::Aborted(AbortReason::Infrastructure(error.to_string())),
            };
        }

        match self.applier.check_and_apply(&diff, &repo, diff.dialect()).await {
            Ok(applied) => {
                progress.logs.push(format!(
                    "applied: {} created, {} modified, {} deleted",
                    applied.created.len(),
                    applied.modified.len(),
                    applied.deleted.len()
                ));
                progress.applied = Some(diff);
                if self.gate.runs_checks() {
                    StepState::Verifying
                } else {
                    StepState::Accepted
                }
            }
            Err(error) => {
                if error.kind == ApplyErrorKind::Rejected {
                    progress.applied = Some(diff);
                }
                Self::apply_failed(progress, &error)
            }
        }
    }

    fn apply_failed(progress: &mut StepProgress, error: &ApplyError) -> StepState {
        if error.requires_manual_recovery() {
            let rejects: Vec<String> = error
                .reject_files
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            warn!("Hunks rejected; reject files: {}", rejects.join(", "));
            progress.logs.push(format!("reject files: {}", rejects.join(", ")));
            return StepState::Aborted(AbortReason::ApplyRejected(error.to_string()));
        }
        progress.feedback.push_issue(format!("diff does not apply: {error}"));
        StepState::Refining
    }

    async fn verify(&self, step: &WorkStep, progress: &mut StepProgress) -> StepState {
        let repo = self.repo();
        let cancel = self.resources.cancel();
        let mut results = Vec::with_capacity(self.config.verify.commands.len());

        for key in &self.config.verify.commands {
            let run = match &progress.session {
                Some(session) => session.execute(*key, cancel).await,
                None => self.adapter.run(&repo, *key, cancel).await,
            };
            match run {
                Ok(diagnostics) => {
                    debug!("{}: {}", step.name, diagnostics.summary());
                    results.push(diagnostics);
                }
                Err(Error::Cancelled) => return StepState::Aborted(AbortReason::Cancelled),
                Err(error @ Error::CommandLaunch { .. }) => {
                    return StepState::Aborted(AbortReason::CommandLaunch(error.to_string()));
                }
                Err(error) => {
                    return StepState::Aborted(AbortReason::Infrastructure(error.to_string()));
                }
            }
        }

        let mut failures: Vec<String> = results
            .iter()
            .filter(|diagnostics| !diagnostics.passed())
            .map(Diagnostics::summary)
            .collect();
        if !step.success_signals.is_empty() {
            let output: Vec<&str> = results.iter().map(|result| result.output.as_str()).collect();
            if !step.signals_satisfied(&output.join("\n")) {
                failures.push(format!(
                    "success signals not observed: {}",
                    step.success_signals.join(", ")
                ));
            }
        }
        progress.diagnostics = results;

        if failures.is_empty() {
            return StepState::Judging;
        }
        let detail = failures.join("; ");
        match self.gate {
            GateMode::Strict => StepState::Aborted(AbortReason::VerificationFailed(detail)),
            GateMode::Migrate | GateMode::Lenient => {
                warn!("Step `{}` verification failed under {}: {detail}", step.name, self.gate);
                progress.feedback.push_diagnostics(&progress.diagnostics);
                for failure in failures {
                    progress.feedback.push_issue(failure.clone());
                    progress.record_warning(failure);
                }
                StepState::Judging
            }
        }
    }

    async fn judge(&self, progress: &mut StepProgress) -> StepState {
        let Some(diff) = progress.diff.clone() else {
            return StepState::Refining;
        };
        let context = match self.resources.context().await {
            Ok(context) => context,
            Err(error) => return StepState::Aborted(AbortReason::Infrastructure(error.to_string())),
        };

        // Failures the gate already downgraded to warnings are not judged again.
        let verified: Vec<Diagnostics> = progress
            .diagnostics
            .iter()
            .filter(|diagnostics| diagnostics.passed())
            .cloned()
            .collect();
        let score = self
            .judge
            .judge(&diff, &context.contract, &verified, &progress.pre);
        progress.logs.push(score.summary());

        if !score.accepted {
            if self.gate == GateMode::Strict {
                return StepState::Aborted(AbortReason::JudgeRejected(score.summary()));
            }
            warn!("Accepting under {} despite {}", self.gate, score.summary());
            progress.record_warning(score.summary());
            for violation in &score.violations {
                progress.feedback.push_issue(violation.to_string());
            }
        }

        self.promote(&diff, progress).await
    }

    /// Moves a sandbox-verified diff into the real tree.
    async fn promote(&self, diff: &Diff, progress: &mut StepProgress) -> StepState {
        if progress.session.take().is_none() {
            return StepState::Accepted;
        }
        match self
            .applier
            .check_and_apply(diff, &self.repo(), diff.dialect())
            .await
        {
            Ok(_) => {
                progress.logs.push("promoted sandbox diff".to_owned());
                progress.applied = Some(diff.clone());
                StepState::Accepted
            }
            Err(error) => {
                if error.kind == ApplyErrorKind::Rejected {
                    progress.applied = Some(diff.clone());
                }
                Self::apply_failed(progress, &error)
            }
        }
    }

    fn refine(&self, progress: &mut StepProgress) -> StepState {
        progress.session = None;
        if progress.attempts >= self.config.max_attempts {
            return StepState::Aborted(AbortReason::RetryBudgetExhausted);
        }
        progress.feedback.attempt = progress.attempts;
        if let Some(diff) = &progress.diff {
            progress.feedback.set_previous_diff(diff.clone());
        }
        debug!("Refining with feedback:\n{}", progress.feedback.render());
        StepState::Generating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use patchwork_core::{
        EditOp, PatchOps, PathStrip, PatternContract, RepoContext, Result, StaticContextProvider,
    };
    use std::collections::VecDeque;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Scripted {
        replies: Mutex<VecDeque<Result<Candidate>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Candidate>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }

        async fn next(&self) -> Result<Candidate> {
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(Error::Generator("script exhausted".to_owned())))
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(
            &self,
            _task: &AgentTask,
            _contract: &PatternContract,
            _examples: &[String],
            _step: &WorkStep,
        ) -> Result<Candidate> {
            self.next().await
        }

        async fn refine(
            &self,
            _task: &AgentTask,
            _step: &WorkStep,
            _feedback: &Feedback,
            _previous: Option<&Diff>,
        ) -> Result<Candidate> {
            self.next().await
        }
    }

    fn append(code: &str) -> Candidate {
        Candidate::Ops(PatchOps::new(vec![EditOp::AppendIfMissing {
            path: "src/a.ts".to_owned(),
            code: code.to_owned(),
            guard: code.to_owned(),
        }]))
    }

    fn runner(repo: &TempDir, generator: Scripted, gate: GateMode) -> StepRunner {
        let config = PipelineConfig::default().with_max_attempts(2);
        let resources = RunResources::new(
            repo.path(),
            Arc::new(StaticContextProvider::new(RepoContext::default())),
            &CancellationToken::new(),
        );
        StepRunner::new(
            Arc::new(config),
            gate,
            Arc::new(AgentTask::new(repo.path(), "add code")),
            Arc::new(generator),
            None,
            Arc::new(RepoCommandAdapter::default()),
            DiffApplier::default(),
            Arc::new(resources),
        )
    }

    fn repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.ts"), "export const a = 1;\n").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_generator_failure_then_success() {
        let repo = repo();
        let generator = Scripted::new(vec![
            Err(Error::Generator("rate limited".to_owned())),
            Ok(append("export const b = 2;")),
        ]);
        let run = runner(&repo, generator, GateMode::Strict)
            .run(&WorkStep::new("add-b", "").with_file("src/a.ts"))
            .await;

        assert_eq!(run.report.outcome, StepOutcome::Accepted);
        assert_eq!(run.report.attempts, 2);
        assert!(run.report.applied_diff.is_some());
        let content = fs::read_to_string(repo.path().join("src/a.ts")).unwrap();
        assert!(content.contains("export const b = 2;"));
    }

    #[tokio::test]
    async fn test_unrecoverable_generator_error_aborts() {
        let repo = repo();
        let generator = Scripted::new(vec![
            Err(Error::Context("index vanished".to_owned())),
            Ok(append("export const b = 2;")),
        ]);
        let run = runner(&repo, generator, GateMode::Strict)
            .run(&WorkStep::new("add-b", "").with_file("src/a.ts"))
            .await;

        assert!(matches!(
            &run.report.outcome,
            StepOutcome::Aborted(AbortReason::Infrastructure(detail)) if detail.contains("index vanished")
        ));
        assert_eq!(run.report.attempts, 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_on_bad_anchors() {
        let repo = repo();
        let missing = || {
            Ok(Candidate::Ops(PatchOps::new(vec![EditOp::InsertAfter {
                path: "src/a.ts".to_owned(),
                anchor: "class Missing".to_owned(),
                code: "x".to_owned(),
                occurrence: None,
            }])))
        };
        let generator = Scripted::new(vec![missing(), missing(), missing()]);
        let run = runner(&repo, generator, GateMode::Strict)
            .run(&WorkStep::new("broken", ""))
            .await;

        assert_eq!(
            run.report.outcome,
            StepOutcome::Aborted(AbortReason::RetryBudgetExhausted)
        );
        assert_eq!(run.report.attempts, 2);
        assert!(run.report.applied_diff.is_none());
    }

    #[tokio::test]
    async fn test_lenient_skips_verification() {
        let repo = repo();
        let diff = Diff::new(
            "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1 +1,2 @@\n export const a = 1;\n+export const c: any = 3;\n",
            PathStrip::P1,
        );
        let generator = Scripted::new(vec![Ok(Candidate::Diff(diff))]);
        let run = runner(&repo, generator, GateMode::Lenient)
            .run(&WorkStep::new("lenient", ""))
            .await;

        assert_eq!(run.report.outcome, StepOutcome::Accepted);
        assert!(run.report.last_diagnostics.is_empty());
    }
}
