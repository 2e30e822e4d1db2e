//! Plan-level orchestration: gate resolution, context discovery, install and
//! the bounded step pool.

use crate::pool::StepPool;
use crate::resources::RunResources;
use crate::runner::{StepRun, StepRunner};
use crate::scheduler::ConflictSchedule;
use patchwork_core::{
    AbortReason, AgentRunResult, AgentTask, ContextProvider, GateMode, Generator, PipelineConfig,
    SandboxExecutor, StepOutcome, StepReport, WorkPlan,
};
use patchwork_edit::{DiffApplier, RepoLocks};
use patchwork_verify::{RepoCommandAdapter, TempDirSandbox};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs work plans step by step through generation, verification and the
/// quality gate.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    generator: Arc<dyn Generator>,
    context_provider: Arc<dyn ContextProvider>,
    sandbox: Option<Arc<dyn SandboxExecutor>>,
    adapter: Arc<RepoCommandAdapter>,
    applier: DiffApplier,
}

impl Orchestrator {
    /// Creates an orchestrator with the default adapter and applier.
    ///
    /// When `verify_in_sandbox` is set and no custom sandbox is given, each
    /// run verifies in a temp-dir copy of the repository.
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn Generator>,
        context_provider: Arc<dyn ContextProvider>,
    ) -> Self {
        let adapter = Arc::new(RepoCommandAdapter::from_config(&config));
        let applier = DiffApplier::new(config.apply_backend);

        Self {
            config: Arc::new(config),
            generator,
            context_provider,
            sandbox: None,
            adapter,
            applier,
        }
    }

    /// Verifies through a custom sandbox instead of the working tree.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Sets a custom command adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<RepoCommandAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Shares repository locks with other appliers in the process.
    #[must_use]
    pub fn with_locks(mut self, locks: RepoLocks) -> Self {
        self.applier = self.applier.with_locks(locks);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes `plan` for `task`.
    ///
    /// Never fails: plan errors, context failures, aborted and skipped steps
    /// are all reported through the returned [`AgentRunResult`].
    pub async fn run(
        &self,
        task: AgentTask,
        plan: &WorkPlan,
        cancel: &CancellationToken,
    ) -> AgentRunResult {
        let gate = GateMode::from_env_or(self.config.gate_mode);
        let mut logs = vec![format!(
            "goal: {} ({} steps, gate {gate}, parallelism {})",
            plan.goal,
            plan.steps.len(),
            plan.parallelism
        )];
        info!("Running plan `{}` under {gate} gate", plan.goal);

        if let Err(error) = plan.validate() {
            warn!("Rejecting plan: {error}");
            return Self::skip_all(plan, &error.to_string(), logs);
        }
        if task.repo != plan.repo {
            warn!(
                "Task repository {} differs from plan repository {}; using the plan's",
                task.repo.display(),
                plan.repo.display()
            );
        }

        let resources = Arc::new(RunResources::new(
            &plan.repo,
            Arc::clone(&self.context_provider),
            cancel,
        ));
        if let Err(error) = resources.context().await {
            resources.teardown();
            return Self::skip_all(plan, &error.to_string(), logs);
        }

        // Commands are fixed for the whole run, before any diff lands.
        let adapter = match self.adapter.for_repo(resources.repo()).await {
            Ok(adapter) => Arc::new(adapter),
            Err(error) => {
                resources.teardown();
                return Self::skip_all(plan, &error.to_string(), logs);
            }
        };
        let sandbox = self.sandbox.clone().or_else(|| {
            self.config.verify_in_sandbox.then(|| {
                Arc::new(TempDirSandbox::new(Arc::clone(&adapter))) as Arc<dyn SandboxExecutor>
            })
        });

        if self.config.run_install {
            let failure = match adapter.prepare(resources.repo(), resources.cancel()).await {
                Ok(diagnostics) if diagnostics.passed() => {
                    logs.push(format!("install: {}", diagnostics.summary()));
                    None
                }
                Ok(diagnostics) => Some(diagnostics.summary()),
                Err(error) => Some(error.to_string()),
            };
            if let Some(detail) = failure {
                if gate == GateMode::Strict {
                    resources.teardown();
                    return Self::skip_all(plan, &format!("install failed: {detail}"), logs);
                }
                warn!("Install failed, continuing under {gate}: {detail}");
                logs.push(format!("install failed: {detail}"));
            }
        }

        let runner = StepRunner::new(
            Arc::clone(&self.config),
            gate,
            Arc::new(task),
            Arc::clone(&self.generator),
            sandbox,
            adapter,
            self.applier.clone(),
            Arc::clone(&resources),
        );
        let schedule = ConflictSchedule::from_steps(&plan.steps);
        let outcome = StepPool::new(plan.parallelism)
            .run(
                &schedule,
                |index| {
                    let runner = runner.clone();
                    let step = plan.steps[index].clone();
                    async move { runner.run(&step).await }
                },
                |run: &StepRun| gate == GateMode::Strict && run.is_aborted(),
            )
            .await;

        let mut slots: Vec<Option<StepRun>> = vec![None; plan.steps.len()];
        for (index, run) in outcome.completed {
            slots[index] = Some(run);
        }
        let finished = resources.elapsed();
        for (index, reason) in outcome.failed {
            let mut report = StepReport::skipped(&plan.steps[index].name, "", finished);
            report.outcome = StepOutcome::Aborted(AbortReason::Infrastructure(reason));
            slots[index] = Some(StepRun {
                report,
                logs: Vec::new(),
            });
        }

        let mut reports = Vec::with_capacity(plan.steps.len());
        for (step, slot) in plan.steps.iter().zip(slots) {
            let Some(run) = slot else {
                logs.push(format!("{}: skipped (plan aborted)", step.name));
                reports.push(StepReport::skipped(&step.name, "plan aborted", finished));
                continue;
            };
            logs.extend(run.logs);
            reports.push(run.report);
        }
        resources.teardown();

        let result = AgentRunResult::from_reports(reports, logs);
        info!(
            "Plan `{}` finished: {}",
            plan.goal,
            if result.success { "success" } else { "failure" }
        );
        result
    }

    fn skip_all(plan: &WorkPlan, reason: &str, mut logs: Vec<String>) -> AgentRunResult {
        logs.push(format!("run not started: {reason}"));
        let reports = plan
            .steps
            .iter()
            .map(|step| StepReport::skipped(&step.name, reason, Duration::ZERO))
            .collect();
        AgentRunResult::from_reports(reports, logs)
    }
}
