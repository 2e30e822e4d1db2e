//! In-memory file contents keyed by repository-relative path.

use crate::patch::{apply_hunks, parse_diff};
use crate::paths::resolve_in_repo;
use patchwork_core::{ApplyError, ApplyErrorKind, Diff, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

type ApplyResult<T> = core::result::Result<T, ApplyError>;

/// An arena of file contents. Files not present are absent, not empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    files: BTreeMap<String, String>,
}

impl FileSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Inserts or replaces a file.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Removes a file, returning its content.
    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    /// Content of a file, if present.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Whether a file is present.
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Paths of present files, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Number of present files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files are present.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Reads the given repository-relative files. Missing files are left absent.
    ///
    /// # Errors
    /// Returns an error if a path escapes the repository or a file exists but
    /// cannot be read.
    pub async fn load<I, P>(repo: &Path, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut snapshot = Self::new();
        for path in paths {
            let relative = path.as_ref();
            let absolute = resolve_in_repo(repo, relative)?;
            match fs::read_to_string(&absolute).await {
                Ok(content) => snapshot.insert(relative, content),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(snapshot)
    }

    /// Returns a copy with `diff` applied in memory.
    ///
    /// Every hunk must apply; nothing is written to disk.
    ///
    /// # Errors
    /// Returns the same error kinds a dry-run validation would report.
    pub fn apply_diff(&self, diff: &Diff) -> ApplyResult<Self> {
        let mut patched = self.clone();
        if diff.is_empty() {
            return Ok(patched);
        }

        for patch in parse_diff(diff.text(), diff.dialect())? {
            let target = patch.target().to_owned();
            let current = match (patch.old_path.as_deref(), patched.get(&target)) {
                (None, Some(_)) => {
                    return Err(ApplyError::new(
                        ApplyErrorKind::FileExists,
                        format!("{target} already exists"),
                    )
                    .with_path(target));
                }
                (None, None) => "",
                (Some(_), Some(content)) => content,
                (Some(_), None) => {
                    return Err(ApplyError::new(
                        ApplyErrorKind::MissingFile,
                        format!("{target} does not exist"),
                    )
                    .with_path(target));
                }
            };

            let applied = apply_hunks(current, &patch.hunks);
            if let Some(first) = applied.rejected.first() {
                let hunk = patch.hunks.get(*first).map(|hunk| hunk.raw.clone());
                let mut error = ApplyError::new(
                    ApplyErrorKind::HunkMismatch,
                    format!("hunk {} does not match {target}", first + 1),
                )
                .with_path(target);
                if let Some(raw) = hunk {
                    error = error.with_hunk(raw);
                }
                return Err(error);
            }

            if patch.is_deletion() {
                patched.remove(&target);
            } else {
                patched.insert(target, applied.content);
            }
        }

        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_core::PathStrip;
    use std::fs as stdfs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_leaves_missing_files_absent() -> Result<()> {
        let temp = TempDir::new()?;
        stdfs::write(temp.path().join("present.ts"), "x\n")?;

        let snapshot = FileSnapshot::load(temp.path(), ["present.ts", "absent.ts"]).await?;
        assert_eq!(snapshot.get("present.ts"), Some("x\n"));
        assert!(!snapshot.contains("absent.ts"));
        assert_eq!(snapshot.len(), 1);
        Ok(())
    }

    #[test]
    fn test_apply_diff_in_memory() {
        let snapshot = FileSnapshot::new().with_file("a.txt", "one\ntwo\n");
        let diff = Diff::new(
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+TWO\n--- /dev/null\n+++ b/b.txt\n@@ -0,0 +1 @@\n+new\n",
            PathStrip::P1,
        );
        let patched = match snapshot.apply_diff(&diff) {
            Ok(patched) => patched,
            Err(error) => panic!("apply failed: {error}"),
        };
        assert_eq!(patched.get("a.txt"), Some("one\nTWO\n"));
        assert_eq!(patched.get("b.txt"), Some("new\n"));
        assert_eq!(snapshot.get("a.txt"), Some("one\ntwo\n"));
    }

    #[test]
    fn test_apply_diff_reports_missing_file() {
        let diff = Diff::new("--- a/x.txt\n+++ b/x.txt\n@@ -1 +1 @@\n-a\n+b\n", PathStrip::P1);
        let error = match FileSnapshot::new().apply_diff(&diff) {
            Ok(_) => panic!("expected missing file"),
            Err(error) => error,
        };
        assert_eq!(error.kind, ApplyErrorKind::MissingFile);
    }
}
