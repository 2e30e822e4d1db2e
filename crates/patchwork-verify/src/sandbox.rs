//! Temporary-directory sandbox: verify a diff against a copy of the repository.

use crate::adapter::RepoCommandAdapter;
use async_trait::async_trait;
use patchwork_core::{
    CommandKey, Diagnostics, Diff, Error, PathStrip, Result, SandboxExecutor, SandboxSession,
};
use patchwork_edit::DiffApplier;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs::{copy, create_dir_all, read_dir};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Directory names never copied into a sandbox.
const SKIPPED_DIRS: [&str; 5] = [".git", "target", "node_modules", ".idea", ".vscode"];

/// Stages diffs into throwaway copies of the repository.
#[derive(Debug, Clone)]
pub struct TempDirSandbox {
    adapter: Arc<RepoCommandAdapter>,
    applier: DiffApplier,
}

impl TempDirSandbox {
    /// Creates a sandbox that runs commands through `adapter`.
    pub fn new(adapter: Arc<RepoCommandAdapter>) -> Self {
        Self {
            adapter,
            applier: DiffApplier::default(),
        }
    }

    /// Copy the repository into `destination`, skipping VCS and build output.
    ///
    /// # Errors
    /// Returns an error if filesystem operations fail during copying.
    pub async fn copy_repository(source: &Path, destination: &Path) -> Result<()> {
        copy_dir_recursive(source.to_path_buf(), destination.to_path_buf()).await
    }
}

fn copy_dir_recursive(source: PathBuf, destination: PathBuf) -> BoxFuture<Result<()>> {
    Box::pin(async move {
        create_dir_all(&destination).await?;
        let mut entries = read_dir(&source).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if SKIPPED_DIRS
                .iter()
                .any(|skipped| file_name.as_os_str() == *skipped)
            {
                continue;
            }

            let path = entry.path();
            let target = destination.join(&file_name);
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                copy_dir_recursive(path, target).await?;
            } else if file_type.is_file() {
                copy(&path, &target).await?;
            }
        }

        Ok(())
    })
}

#[async_trait]
impl SandboxExecutor for TempDirSandbox {
    async fn stage(
        &self,
        repo: &Path,
        diff: &Diff,
        strip: PathStrip,
    ) -> Result<Box<dyn SandboxSession>> {
        let temp_dir = TempDir::new()
            .map_err(|error| Error::Other(format!("Failed to create temp dir: {error}")))?;
        Self::copy_repository(repo, temp_dir.path()).await?;
        let applied = self.applier.apply(diff, temp_dir.path(), strip).await?;
        debug!(
            "Staged {} file(s) into sandbox {}",
            applied.touched().count(),
            temp_dir.path().display()
        );

        Ok(Box::new(TempDirSession {
            temp_dir,
            adapter: Arc::clone(&self.adapter),
        }))
    }
}

/// A staged copy. The directory is removed when the session drops.
#[derive(Debug)]
pub struct TempDirSession {
    temp_dir: TempDir,
    adapter: Arc<RepoCommandAdapter>,
}

#[async_trait]
impl SandboxSession for TempDirSession {
    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    async fn execute(
        &self,
        command: CommandKey,
        cancel: &CancellationToken,
    ) -> Result<Diagnostics> {
        self.adapter.run(self.temp_dir.path(), command, cancel).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use patchwork_core::AdapterConfig;
    use std::fs;

    fn repo() -> TempDir {
        let temp = match TempDir::new() {
            Ok(temp) => temp,
            Err(error) => panic!("tempdir: {error}"),
        };
        for dir in ["src", ".git", "node_modules/pkg"] {
            if let Err(error) = fs::create_dir_all(temp.path().join(dir)) {
                panic!("mkdir: {error}");
            }
        }
        for (path, content) in [
            ("src/a.txt", "one\n"),
            (".git/HEAD", "ref\n"),
            ("node_modules/pkg/index.js", "x\n"),
        ] {
            if let Err(error) = fs::write(temp.path().join(path), content) {
                panic!("write: {error}");
            }
        }
        temp
    }

    #[tokio::test]
    async fn test_stage_copies_and_patches_without_touching_repo() {
        let repo = repo();
        let adapter = RepoCommandAdapter::new(
            AdapterConfig::default().with_command(CommandKey::Test, "cat src/a.txt"),
        );
        let sandbox = TempDirSandbox::new(Arc::new(adapter));
        let diff = Diff::new(
            "--- a/src/a.txt\n+++ b/src/a.txt\n@@ -1 +1 @@\n-one\n+two\n",
            PathStrip::P1,
        );

        let session = match sandbox.stage(repo.path(), &diff, PathStrip::P1).await {
            Ok(session) => session,
            Err(error) => panic!("stage failed: {error}"),
        };
        assert!(!session.root().join(".git").exists());
        assert!(!session.root().join("node_modules").exists());

        let diagnostics = match session.execute(CommandKey::Test, &CancellationToken::new()).await {
            Ok(diagnostics) => diagnostics,
            Err(error) => panic!("execute failed: {error}"),
        };
        assert_eq!(diagnostics.output, "two\n");
        assert_eq!(
            fs::read_to_string(repo.path().join("src/a.txt")).unwrap_or_default(),
            "one\n"
        );
    }

    #[tokio::test]
    async fn test_stage_reports_apply_failure() {
        let repo = repo();
        let sandbox = TempDirSandbox::new(Arc::new(RepoCommandAdapter::default()));
        let diff = Diff::new(
            "--- a/src/missing.txt\n+++ b/src/missing.txt\n@@ -1 +1 @@\n-a\n+b\n",
            PathStrip::P1,
        );
        let result = sandbox.stage(repo.path(), &diff, PathStrip::P1).await;
        assert!(matches!(result, Err(Error::Apply(_))));
    }
}
