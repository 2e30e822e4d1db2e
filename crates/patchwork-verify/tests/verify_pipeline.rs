//! Integration tests: sandboxed verification feeding the quality judge.

#![cfg(unix)]
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use patchwork_core::{
    AdapterConfig, CommandKey, Diagnostics, Diff, PathStrip, PatternContract,
    SandboxExecutor as _,
};
use patchwork_edit::FileSnapshot;
use patchwork_verify::{QualityJudge, RepoCommandAdapter, TempDirSandbox, ViolationKind};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MATH: &str = "export function add(left: number, right: number): number {\n  return left + right;\n}\n";

fn repo() -> TempDir {
    let temp = TempDir::new().expect("tempdir");
    fs::create_dir_all(temp.path().join("src")).expect("mkdir");
    fs::write(temp.path().join("src/math.ts"), MATH).expect("write");
    temp
}

fn adding(line: &str) -> Diff {
    Diff::new(
        format!(
            "--- a/src/math.ts\n+++ b/src/math.ts\n@@ -1,3 +1,4 @@\n export function add(left: number, right: number): number {{\n   return left + right;\n }}\n+{line}\n"
        ),
        PathStrip::P1,
    )
}

#[tokio::test]
async fn test_sandbox_verification_then_judge() {
    let repo = repo();
    let commands = AdapterConfig::default()
        .with_command(CommandKey::Lint, "! grep -q console src/math.ts")
        .with_command(CommandKey::Test, "grep -q subtract src/math.ts");
    let sandbox = TempDirSandbox::new(Arc::new(RepoCommandAdapter::new(commands)));
    let diff = adding("export function subtract(left: number, right: number): number { return left - right; }");

    let session = sandbox
        .stage(repo.path(), &diff, PathStrip::P1)
        .await
        .expect("stage");
    let cancel = CancellationToken::new();
    let mut diagnostics = Vec::new();
    for key in CommandKey::VERIFY_ORDER {
        diagnostics.push(session.execute(key, &cancel).await.expect("execute"));
    }
    assert!(diagnostics.iter().all(Diagnostics::passed));

    let pre = FileSnapshot::load(repo.path(), ["src/math.ts"]).await.expect("load");
    let score = QualityJudge::default().judge(&diff, &PatternContract::default(), &diagnostics, &pre);
    assert!(score.accepted, "{}", score.summary());

    assert_eq!(fs::read_to_string(repo.path().join("src/math.ts")).expect("read"), MATH);
}

#[tokio::test]
async fn test_failing_lint_in_sandbox_rejects() {
    let repo = repo();
    let commands = AdapterConfig::default().with_command(CommandKey::Lint, "! grep -q console src/math.ts");
    let sandbox = TempDirSandbox::new(Arc::new(RepoCommandAdapter::new(commands)));
    let diff = adding("console.log(add(1, 2));");

    let lint = sandbox
        .execute(repo.path(), &diff, CommandKey::Lint, &CancellationToken::new())
        .await
        .expect("execute");
    assert!(!lint.passed());

    let pre = FileSnapshot::load(repo.path(), ["src/math.ts"]).await.expect("load");
    let score = QualityJudge::default().judge(&diff, &PatternContract::default(), &[lint], &pre);
    assert!(!score.accepted);
    assert!(
        score
            .violations
            .iter()
            .any(|violation| violation.kind == ViolationKind::Verification)
    );
}
