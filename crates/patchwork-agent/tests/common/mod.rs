//! Common test utilities for patchwork-agent integration tests
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use async_trait::async_trait;
use patchwork_core::{
    AgentTask, Candidate, Diff, EditOp, Error, Feedback, Generator, PatchOps, PatternContract,
    RepoContext, Result, StaticContextProvider, WorkStep,
};
use std::collections::{HashMap, VecDeque};
use std::env;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, fmt};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (idempotent).
/// Honors `RUST_LOG` if set, otherwise defaults to "debug".
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_owned());
        if fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_test_writer()
            .try_init()
            .is_err()
        {
            // tracing already initialized in this process
        }
    });
}

/// Scratch repository with two small TypeScript modules.
pub fn repo() -> TempDir {
    let temp = TempDir::new().expect("tempdir");
    fs::create_dir_all(temp.path().join("src")).expect("mkdir");
    fs::write(temp.path().join("src/a.ts"), "export const a = 1;\n").expect("write a");
    fs::write(temp.path().join("src/b.ts"), "export const b = 2;\n").expect("write b");
    temp
}

pub fn read(repo: &TempDir, path: &str) -> String {
    fs::read_to_string(repo.path().join(path)).expect("read")
}

pub fn context() -> Arc<StaticContextProvider> {
    Arc::new(StaticContextProvider::new(RepoContext {
        contract: PatternContract::default(),
        examples: vec!["export const sample = 0;".to_owned()],
    }))
}

pub fn task(repo: &TempDir) -> AgentTask {
    AgentTask::new(repo.path(), "extend the modules")
}

/// Ops candidate appending `code` to `path` unless already present.
pub fn append(path: &str, code: &str) -> Candidate {
    Candidate::Ops(PatchOps::new(vec![EditOp::AppendIfMissing {
        path: path.to_owned(),
        code: code.to_owned(),
        guard: code.to_owned(),
    }]))
}

/// Ops candidate whose anchor never resolves.
pub fn unresolvable(path: &str) -> Candidate {
    Candidate::Ops(PatchOps::new(vec![EditOp::InsertAfter {
        path: path.to_owned(),
        anchor: "class DoesNotExist".to_owned(),
        code: "  method() {}".to_owned(),
        occurrence: None,
    }]))
}

/// Generator replaying scripted candidates per step name.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<String, VecDeque<Candidate>>>,
    delay: Duration,
    generate_calls: AtomicUsize,
    refine_calls: AtomicUsize,
    feedback: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_replies(self, step: &str, replies: Vec<Candidate>) -> Self {
        self.replies
            .try_lock()
            .expect("unshared generator")
            .insert(step.to_owned(), replies.into());
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn refine_calls(&self) -> usize {
        self.refine_calls.load(Ordering::SeqCst)
    }

    pub async fn feedback(&self) -> Vec<String> {
        self.feedback.lock().await.clone()
    }

    async fn next(&self, step: &WorkStep) -> Result<Candidate> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.replies
            .lock()
            .await
            .get_mut(&step.name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| Error::Generator(format!("no reply scripted for `{}`", step.name)))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _task: &AgentTask,
        _contract: &PatternContract,
        _examples: &[String],
        step: &WorkStep,
    ) -> Result<Candidate> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.next(step).await
    }

    async fn refine(
        &self,
        _task: &AgentTask,
        step: &WorkStep,
        feedback: &Feedback,
        _previous: Option<&Diff>,
    ) -> Result<Candidate> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        self.feedback.lock().await.push(feedback.render());
        self.next(step).await
    }
}
