//! Runs a repository's own lint, typecheck, test and build commands.

use patchwork_core::feedback::truncate;
use patchwork_core::{AdapterConfig, CommandKey, Diagnostics, Error, PipelineConfig, Result};
use std::io::{Error as IoError, Result as IoResult};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long output readers may keep going once the command is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Maps command keys to shell commands and runs them as child processes.
///
/// Every command runs in its own process group. When a command is
/// cancelled, times out or exits, the whole group is killed so background
/// jobs cannot keep touching the repository.
///
/// A key with no command is a vacuous pass.
#[derive(Debug, Clone)]
pub struct RepoCommandAdapter {
    commands: AdapterConfig,
    timeout_seconds: u64,
    max_output_bytes: usize,
}

impl Default for RepoCommandAdapter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// How the wait for a command ended.
enum Ended {
    Exited(IoResult<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl RepoCommandAdapter {
    /// Creates an adapter with the given commands.
    pub fn new(commands: AdapterConfig) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }

    /// Creates an adapter from pipeline settings.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            timeout_seconds: config.command_timeout_seconds,
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Set the per-command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set the captured output limit
    #[must_use]
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Commands this adapter runs.
    pub const fn commands(&self) -> &AdapterConfig {
        &self.commands
    }

    /// Adapter for `repo`: its `.patchwork/adapter.toml` replaces the
    /// configured commands when present.
    ///
    /// Read once, before any step runs; diffs applied later cannot change
    /// which commands verify them.
    ///
    /// # Errors
    /// Returns an error if the repository adapter file is invalid.
    pub async fn for_repo(&self, repo: &Path) -> Result<Self> {
        let commands = AdapterConfig::resolve(repo, &self.commands).await?;
        Ok(Self {
            commands,
            ..self.clone()
        })
    }

    /// Runs the command configured for `key` in `repo`.
    ///
    /// # Errors
    /// Returns [`Error::CommandLaunch`] if the process cannot be started or
    /// [`Error::Cancelled`] if `cancel` fires first. Failing and timed-out
    /// commands are reported through [`Diagnostics`], not as errors.
    pub async fn run(
        &self,
        repo: &Path,
        key: CommandKey,
        cancel: &CancellationToken,
    ) -> Result<Diagnostics> {
        let Some(command_line) = self.commands.command(key) else {
            debug!("No {key} command configured for {}", repo.display());
            return Ok(Diagnostics::skipped(key));
        };
        self.run_command(repo, key, command_line, cancel).await
    }

    /// Runs the `install` command, if any, before a run starts.
    ///
    /// # Errors
    /// Same conditions as [`Self::run`].
    pub async fn prepare(&self, repo: &Path, cancel: &CancellationToken) -> Result<Diagnostics> {
        let diagnostics = self.run(repo, CommandKey::Install, cancel).await?;
        if !diagnostics.skipped {
            info!("Prepared {}: {}", repo.display(), diagnostics.summary());
        }
        Ok(diagnostics)
    }

    /// Runs an explicit command line under `key`.
    ///
    /// Output captured before a timeout is kept in the timed-out
    /// [`Diagnostics`].
    ///
    /// # Errors
    /// See [`Self::run`].
    pub async fn run_command(
        &self,
        repo: &Path,
        key: CommandKey,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<Diagnostics> {
        let launch_error = |error: &IoError| Error::CommandLaunch {
            command: command_line.to_owned(),
            reason: error.to_string(),
        };

        debug!("Running {key} command `{command_line}` in {}", repo.display());
        let start = Instant::now();
        let mut command = shell(command_line);
        command
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate(&mut command);
        let mut child = command.spawn().map_err(|error| launch_error(&error))?;
        let group = child.id();
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let limit = Duration::from_secs(self.timeout_seconds);
        let ended = tokio::select! {
            () = cancel.cancelled() => Ended::Cancelled,
            waited = timeout(limit, child.wait()) => waited.map_or(Ended::TimedOut, Ended::Exited),
        };

        terminate(&mut child, group);
        if !matches!(ended, Ended::Exited(_))
            && let Err(error) = child.wait().await
        {
            warn!("Could not reap {key} command: {error}");
        }

        let mut combined = String::from_utf8_lossy(&collect(stdout).await).into_owned();
        combined.push_str(&String::from_utf8_lossy(&collect(stderr).await));
        if combined.len() > self.max_output_bytes {
            let kept = truncate(&combined, self.max_output_bytes).len();
            combined.truncate(kept);
            combined.push_str(TRUNCATION_MARKER);
        }

        let status = match ended {
            Ended::Cancelled => {
                warn!("{key} command cancelled; process group terminated");
                return Err(Error::Cancelled);
            }
            Ended::TimedOut => {
                warn!("{key} command timed out after {}s", self.timeout_seconds);
                return Ok(Diagnostics::timed_out(key, combined, self.timeout_seconds));
            }
            Ended::Exited(status) => status.map_err(|error| launch_error(&error))?,
        };

        let exit_code = status.code().unwrap_or(-1);
        let diagnostics = Diagnostics::completed(key, exit_code, combined);
        debug!(
            "{} in {}ms",
            diagnostics.summary(),
            start.elapsed().as_millis()
        );
        Ok(diagnostics)
    }
}

/// Reads a child stream to its end; bytes read before an error are kept.
async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut stream) = stream
        && let Err(error) = stream.read_to_end(&mut buffer).await
    {
        debug!("Output stream closed early: {error}");
    }
    buffer
}

/// Waits briefly for a reader; a stream held open by an escaped process is
/// abandoned.
async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = reader.abort_handle();
    match timeout(DRAIN_GRACE, reader).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(error)) => {
            warn!("Output reader failed: {error}");
            Vec::new()
        }
        Err(_) => {
            abort.abort();
            warn!("Output still open {}s after the command ended", DRAIN_GRACE.as_secs());
            Vec::new()
        }
    }
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

/// Kills every process in the command's group.
#[cfg(unix)]
fn terminate(child: &mut Child, group: Option<u32>) {
    let Some(group) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(group), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => {
            warn!("Could not kill process group {group}: {errno}");
            if let Err(error) = child.start_kill() {
                debug!("Child already gone: {error}");
            }
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _group: Option<u32>) {
    if let Err(error) = child.start_kill() {
        debug!("Child already gone: {error}");
    }
}

#[cfg(windows)]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

#[cfg(not(windows))]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}
