//! Per-run shared resources.

use patchwork_core::{ContextProvider, Error, RepoContext, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resources shared by every step of one run.
///
/// Created at run start and torn down explicitly at run end; nothing here
/// outlives the run.
pub struct RunResources {
    repo: PathBuf,
    provider: Arc<dyn ContextProvider>,
    context: OnceCell<RepoContext>,
    started: Instant,
    cancel: CancellationToken,
}

impl RunResources {
    /// Creates resources for a run over `repo`, cancelled with `parent`.
    pub fn new(
        repo: impl Into<PathBuf>,
        provider: Arc<dyn ContextProvider>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            repo: repo.into(),
            provider,
            context: OnceCell::new(),
            started: Instant::now(),
            cancel: parent.child_token(),
        }
    }

    /// Working tree the run targets.
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// Cancellation token for everything the run starts.
    pub const fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Repository context, discovered on first use.
    ///
    /// # Errors
    /// Returns [`Error::Context`] if discovery fails. A later call retries.
    pub async fn context(&self) -> Result<&RepoContext> {
        self.context
            .get_or_try_init(|| async {
                debug!("Discovering context for {}", self.repo.display());
                self.provider
                    .discover(&self.repo)
                    .await
                    .map_err(|error| match error {
                        Error::Context(message) => Error::Context(message),
                        other => Error::Context(other.to_string()),
                    })
            })
            .await
    }

    /// Cancels anything the run left behind.
    pub fn teardown(&self) {
        self.cancel.cancel();
        debug!("Run resources for {} torn down", self.repo.display());
    }
}
