//! Two-phase diff application: dry-run validation, then apply.

use crate::patch::{FilePatch, apply_hunks, parse_diff, render_rejects};
use crate::paths::resolve_in_repo;
use patchwork_core::{ApplyBackend, ApplyError, ApplyErrorKind, Diff, PathStrip};
use std::collections::{BTreeMap, HashMap};
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

type ApplyResult<T> = Result<T, ApplyError>;

/// Registry of one exclusive lock per repository root.
///
/// Clones share the registry, so every applier built from the same
/// `RepoLocks` serialises check-and-apply on a given repository.
#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    registry: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl RepoLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `repo` and returns the owned guard.
    pub async fn lock(&self, repo: &Path) -> OwnedMutexGuard<()> {
        let key = fs::canonicalize(repo)
            .await
            .unwrap_or_else(|_| repo.to_path_buf());
        let lock = {
            let mut registry = self.registry.lock().await;
            Arc::clone(registry.entry(key).or_default())
        };
        lock.lock_owned().await
    }
}

/// Files changed by a successful apply, repository-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPatch {
    /// Newly created files
    pub created: Vec<String>,
    /// Modified files
    pub modified: Vec<String>,
    /// Deleted files
    pub deleted: Vec<String>,
}

impl AppliedPatch {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Every touched path.
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.created
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .map(String::as_str)
    }
}

/// Planned outcome for one file after simulating every section that touches it.
#[derive(Debug)]
struct PlannedFile {
    relative: String,
    absolute: PathBuf,
    existed: bool,
    content: Option<String>,
    rejects: String,
    rejected_hunks: Vec<String>,
}

/// Validates and applies unified diffs against a working tree.
#[derive(Debug, Clone, Default)]
pub struct DiffApplier {
    backend: ApplyBackend,
    locks: RepoLocks,
}

impl DiffApplier {
    /// Creates an applier with its own lock registry.
    pub fn new(backend: ApplyBackend) -> Self {
        Self {
            backend,
            locks: RepoLocks::new(),
        }
    }

    /// Shares an existing lock registry.
    #[must_use]
    pub fn with_locks(mut self, locks: RepoLocks) -> Self {
        self.locks = locks;
        self
    }

    /// The lock registry in use.
    pub const fn locks(&self) -> &RepoLocks {
        &self.locks
    }

    /// Backend in use.
    pub const fn backend(&self) -> ApplyBackend {
        self.backend
    }

    /// Dry run: proves `diff` applies cleanly to `repo` without writing.
    ///
    /// # Errors
    /// Returns an [`ApplyError`] describing the first problem found: a path
    /// outside the repository, a missing target, an existing creation target,
    /// a malformed diff or a hunk whose context does not match.
    pub async fn validate(&self, diff: &Diff, repo: &Path, strip: PathStrip) -> ApplyResult<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let patches = parse_diff(diff.text(), strip)?;
        let plan = plan(repo, &patches).await?;

        match self.backend {
            ApplyBackend::Native => {
                if let Some(file) = plan.iter().find(|file| !file.rejected_hunks.is_empty()) {
                    let mut error = ApplyError::new(
                        ApplyErrorKind::HunkMismatch,
                        format!("hunk context does not match {}", file.relative),
                    )
                    .with_path(file.relative.clone());
                    if let Some(hunk) = file.rejected_hunks.first() {
                        error = error.with_hunk(hunk.clone());
                    }
                    return Err(error);
                }
            }
            ApplyBackend::Git => {
                let args = ["apply", "--check", strip.flag()];
                let (success, stderr) = run_git(repo, &args, diff.text()).await?;
                if !success {
                    return Err(ApplyError::new(ApplyErrorKind::HunkMismatch, stderr.trim()));
                }
            }
        }

        debug!(
            "Validated diff touching {} file(s) in {}",
            plan.len(),
            repo.display()
        );
        Ok(())
    }

    /// Applies `diff` to `repo`.
    ///
    /// Hunks that cannot be placed are written beside their file as
    /// `<file>.rej`; the rest are applied. Any reject fails the whole call with
    /// [`ApplyErrorKind::Rejected`] and the working tree needs manual recovery.
    ///
    /// # Errors
    /// Returns an [`ApplyError`]; structural problems are reported before
    /// anything is written.
    pub async fn apply(&self, diff: &Diff, repo: &Path, strip: PathStrip) -> ApplyResult<AppliedPatch> {
        if diff.is_empty() {
            return Ok(AppliedPatch::default());
        }
        let patches = parse_diff(diff.text(), strip)?;
        let plan = plan(repo, &patches).await?;

        let (applied, reject_files) = match self.backend {
            ApplyBackend::Native => write_plan(&plan).await?,
            ApplyBackend::Git => {
                let before = reject_stamps(&plan).await;
                let args = ["apply", "--reject", "--whitespace=fix", strip.flag()];
                let (success, stderr) = run_git(repo, &args, diff.text()).await?;
                let rejects = fresh_rejects(&plan, &before).await;
                if !success && rejects.is_empty() {
                    return Err(ApplyError::new(ApplyErrorKind::Backend, stderr.trim()));
                }
                (summarise(&plan), rejects)
            }
        };

        if !reject_files.is_empty() {
            warn!(
                "{} hunk reject file(s) written in {}",
                reject_files.len(),
                repo.display()
            );
            return Err(ApplyError::new(
                ApplyErrorKind::Rejected,
                format!(
                    "{} file(s) had hunks that could not be applied",
                    reject_files.len()
                ),
            )
            .with_reject_files(reject_files));
        }

        info!(
            "Applied diff in {}: {} created, {} modified, {} deleted",
            repo.display(),
            applied.created.len(),
            applied.modified.len(),
            applied.deleted.len()
        );
        Ok(applied)
    }

    /// Validates then applies while holding the repository's exclusive lock.
    ///
    /// # Errors
    /// Returns the validation error, or the apply error if the tree changed
    /// in a way validation could not foresee.
    pub async fn check_and_apply(
        &self,
        diff: &Diff,
        repo: &Path,
        strip: PathStrip,
    ) -> ApplyResult<AppliedPatch> {
        let _guard = self.locks.lock(repo).await;
        self.validate(diff, repo, strip).await?;
        self.apply(diff, repo, strip).await
    }
}

/// Resolves every target, checks existence and simulates each file's hunks.
async fn plan(repo: &Path, patches: &[FilePatch]) -> ApplyResult<Vec<PlannedFile>> {
    let mut files: BTreeMap<String, PlannedFile> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for patch in patches {
        let relative = patch.target().to_owned();
        if !files.contains_key(&relative) {
            let absolute = resolve_in_repo(repo, &relative)?;
            if let Some(old_path) = patch.old_path.as_deref()
                && old_path != relative
            {
                resolve_in_repo(repo, old_path)?;
            }
            let original = match fs::read_to_string(&absolute).await {
                Ok(content) => Some(content),
                Err(error) if error.kind() == ErrorKind::NotFound => None,
                Err(error) => {
                    return Err(ApplyError::new(
                        ApplyErrorKind::Backend,
                        format!("cannot read {relative}: {error}"),
                    )
                    .with_path(relative));
                }
            };
            files.insert(
                relative.clone(),
                PlannedFile {
                    relative: relative.clone(),
                    absolute,
                    existed: original.is_some(),
                    content: original,
                    rejects: String::new(),
                    rejected_hunks: Vec::new(),
                },
            );
            order.push(relative.clone());
        }

        let Some(file) = files.get_mut(&relative) else {
            continue;
        };

        let current = match (patch.is_creation(), file.content.as_deref()) {
            (true, Some(_)) => {
                return Err(ApplyError::new(
                    ApplyErrorKind::FileExists,
                    format!("{relative} already exists"),
                )
                .with_path(relative));
            }
            (true, None) => "",
            (false, Some(content)) => content,
            (false, None) => {
                return Err(ApplyError::new(
                    ApplyErrorKind::MissingFile,
                    format!("{relative} does not exist"),
                )
                .with_path(relative));
            }
        };

        let applied = apply_hunks(current, &patch.hunks);
        if !applied.rejected.is_empty() {
            debug!(
                "{} of {} hunk(s) do not match {relative}",
                applied.rejected.len(),
                patch.hunks.len()
            );
            file.rejects.push_str(&render_rejects(patch, &applied.rejected));
            file.rejected_hunks.extend(
                applied
                    .rejected
                    .iter()
                    .filter_map(|index| patch.hunks.get(*index))
                    .map(|hunk| hunk.raw.clone()),
            );
        }
        file.content = if patch.is_deletion() && applied.content.is_empty() {
            None
        } else {
            Some(applied.content)
        };
    }

    Ok(order
        .into_iter()
        .filter_map(|relative| files.remove(&relative))
        .collect())
}

fn summarise(plan: &[PlannedFile]) -> AppliedPatch {
    let mut applied = AppliedPatch::default();
    for file in plan {
        let bucket = match (file.existed, file.content.is_some()) {
            (false, true) => &mut applied.created,
            (true, true) => &mut applied.modified,
            (true, false) => &mut applied.deleted,
            (false, false) => continue,
        };
        bucket.push(file.relative.clone());
    }
    applied
}

fn io_failure(file: &PlannedFile, error: &IoError) -> ApplyError {
    ApplyError::new(
        ApplyErrorKind::Backend,
        format!("cannot write {}: {error}", file.relative),
    )
    .with_path(file.relative.clone())
}

fn reject_path(absolute: &Path) -> PathBuf {
    let mut name = absolute.as_os_str().to_owned();
    name.push(".rej");
    PathBuf::from(name)
}

/// Writes planned contents and reject files with the native engine.
async fn write_plan(plan: &[PlannedFile]) -> ApplyResult<(AppliedPatch, Vec<PathBuf>)> {
    let mut reject_files = Vec::new();

    for file in plan {
        match &file.content {
            Some(content) => {
                if let Some(parent) = file.absolute.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|error| io_failure(file, &error))?;
                }
                fs::write(&file.absolute, content)
                    .await
                    .map_err(|error| io_failure(file, &error))?;
            }
            None if file.existed => {
                fs::remove_file(&file.absolute)
                    .await
                    .map_err(|error| io_failure(file, &error))?;
            }
            None => {}
        }

        if !file.rejects.is_empty() {
            let path = reject_path(&file.absolute);
            fs::write(&path, &file.rejects)
                .await
                .map_err(|error| io_failure(file, &error))?;
            reject_files.push(path);
        }
    }

    Ok((summarise(plan), reject_files))
}

async fn reject_stamp(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.and_then(|metadata| metadata.modified()).ok()
}

/// Modification times of reject files already present before an apply.
async fn reject_stamps(plan: &[PlannedFile]) -> Vec<Option<SystemTime>> {
    let mut stamps = Vec::with_capacity(plan.len());
    for file in plan {
        stamps.push(reject_stamp(&reject_path(&file.absolute)).await);
    }
    stamps
}

/// Reject files written by this apply; leftovers from earlier runs whose
/// timestamps did not move are ignored.
async fn fresh_rejects(plan: &[PlannedFile], before: &[Option<SystemTime>]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for (file, previous) in plan.iter().zip(before) {
        let path = reject_path(&file.absolute);
        if let Some(stamp) = reject_stamp(&path).await
            && previous.is_none_or(|earlier| earlier != stamp)
        {
            found.push(path);
        } else if previous.is_some() {
            debug!("Ignoring stale reject file {}", path.display());
        }
    }
    found
}

/// Runs `git` in `repo` with `input` on stdin; returns success and stderr.
async fn run_git(repo: &Path, args: &[&str], input: &str) -> ApplyResult<(bool, String)> {
    debug!("Running git {} in {}", args.join(" "), repo.display());
    let backend_error =
        |error: IoError| ApplyError::new(ApplyErrorKind::Backend, format!("git: {error}"));

    let mut child = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(backend_error)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(backend_error)?;
    }

    let output = child.wait_with_output().await.map_err(backend_error)?;
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if stderr.trim().is_empty() {
        stderr = String::from_utf8_lossy(&output.stdout).into_owned();
    }
    Ok((output.status.success(), stderr))
}
